//! The `hook` subcommand: one agent event in on stdin, at most one decision
//! JSON out on stdout.
//!
//! Exit code stays 0 whenever a decision was expressed (including blocks);
//! non-zero is reserved for internal failures.

use anyhow::Context;
use std::io::Read;
use std::process::ExitCode;

use entire_core::agent::AgentKind;
use entire_core::paths::RepoContext;
use entire_core::settings::Settings;
use entire_strategy::{parse_hook_input, strategy_for, HookEvent, Strategy, TerminalConfirm};

use crate::analytics;

pub fn run_hook(agent_arg: Option<&str>) -> anyhow::Result<ExitCode> {
    let ctx = RepoContext::discover().context("not a git repository")?;
    let settings = Settings::load(&ctx.root)?;
    if !settings.enabled {
        return Ok(ExitCode::SUCCESS);
    }

    let agent = match agent_arg {
        Some(name) => AgentKind::from_type_name(name)
            .ok_or_else(|| anyhow::anyhow!("unknown agent: {name}"))?,
        None => crate::resolve_agent(&settings, &ctx),
    };

    let mut payload = String::new();
    std::io::stdin()
        .read_to_string(&mut payload)
        .context("failed to read hook payload from stdin")?;
    let input = parse_hook_input(agent, &payload)?;

    let strategy = strategy_for(&settings, ctx.clone(), agent, Box::new(TerminalConfirm))?;
    let (event_name, response) = match input.event {
        HookEvent::BeforeAgent => ("before_agent", strategy.on_before_agent(&input.session_id)?),
        HookEvent::UserPromptSubmit => (
            "user_prompt_submit",
            strategy.on_user_prompt_submit(&input.session_id)?,
        ),
        HookEvent::Stop | HookEvent::SessionEnd => (
            "stop",
            strategy.on_stop(&input.session_id, input.transcript_path.as_deref())?,
        ),
    };

    if let Some(json) = response.render(agent) {
        println!("{json}");
    }

    analytics::spawn_event(event_name, Some(agent), strategy.name());
    Ok(ExitCode::SUCCESS)
}
