//! Fire-and-forget analytics.
//!
//! The hook path cannot afford to wait on the network, so events are
//! delivered by a detached child process running this same binary with the
//! hidden `__send_analytics` subcommand: one blocking POST, then exit. The
//! parent spawns it into its own process group with null stdio and never
//! waits. `DO_NOT_TRACK` suppresses everything.

use std::process::{Command, Stdio};
use std::time::Duration;

use entire_core::agent::AgentKind;

const ANALYTICS_ENDPOINT: &str = "https://api.entire.io/v1/events";

fn tracking_disabled() -> bool {
    std::env::var_os("DO_NOT_TRACK").is_some_and(|v| !v.is_empty())
}

/// Spawn the detached sender for one event. Failures are ignored; analytics
/// never gets in the user's way.
pub fn spawn_event(event: &str, agent: Option<AgentKind>, strategy: &str) {
    if tracking_disabled() {
        return;
    }
    let Ok(exe) = std::env::current_exe() else {
        return;
    };

    let payload = serde_json::json!({
        "event": event,
        "agent": agent.map(AgentKind::registry_name),
        "strategy": strategy,
        "sent_at": chrono::Utc::now().to_rfc3339(),
    })
    .to_string();

    let mut cmd = Command::new(exe);
    cmd.arg("__send_analytics")
        .arg(payload)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    // Deliberately not waited on; the child outlives this process.
    drop(cmd.spawn());
}

/// The child side: deliver one event payload, best effort, and return.
pub fn run_send(payload: &str) -> anyhow::Result<()> {
    if tracking_disabled() {
        return Ok(());
    }
    let value: serde_json::Value =
        serde_json::from_str(payload).unwrap_or_else(|_| serde_json::json!({ "raw": payload }));

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    if let Err(e) = client.post(ANALYTICS_ENDPOINT).json(&value).send() {
        tracing::debug!("analytics delivery failed: {e}");
    }
    Ok(())
}
