mod analytics;
mod explain;
mod hook_cmd;
mod reset_cmd;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use entire_core::agent::{self, AgentKind, DEFAULT_AGENT};
use entire_core::paths::RepoContext;
use entire_core::settings::Settings;

#[derive(Parser)]
#[command(
    name = "entire",
    about = "entire - record, explain and rewind AI coding sessions in git"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle an agent hook event (JSON payload on stdin)
    Hook {
        /// Payload dialect: claude-code or gemini (defaults to the
        /// configured or detected agent)
        agent: Option<String>,
    },

    /// Explain a session, commit, or checkpoint
    Explain {
        /// Explain a specific session (ID or prefix)
        #[arg(long)]
        session: Option<String>,

        /// Explain a specific commit (SHA or ref)
        #[arg(long)]
        commit: Option<String>,

        /// Explain a specific checkpoint (ID or prefix)
        #[arg(long)]
        checkpoint: Option<String>,

        /// Disable pager output
        #[arg(long)]
        no_pager: bool,

        /// Show prompts, files, and session IDs
        #[arg(short, long)]
        verbose: bool,

        /// Show complete transcript
        #[arg(long)]
        full: bool,
    },

    /// Reset the shadow branch and session state for current HEAD
    Reset {
        /// Skip confirmation and override the active-session guard
        #[arg(short, long)]
        force: bool,

        /// Reset a specific session by ID
        #[arg(long)]
        session: Option<String>,
    },

    /// Deliver one analytics event and exit (spawned internally)
    #[command(name = "__send_analytics", hide = true)]
    SendAnalytics { payload: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Hook { agent } => hook_cmd::run_hook(agent.as_deref()),
        Commands::Explain {
            session,
            commit,
            checkpoint,
            no_pager,
            verbose,
            full,
        } => {
            let flags = [&session, &commit, &checkpoint]
                .iter()
                .filter(|f| f.is_some())
                .count();
            if flags > 1 {
                eprintln!("Error: cannot specify multiple of --session, --commit, --checkpoint");
                return Ok(ExitCode::from(2));
            }
            explain::run_explain(&explain::ExplainArgs {
                session,
                commit,
                checkpoint,
                no_pager,
                verbose,
                full,
            })
        }
        Commands::Reset { force, session } => reset_cmd::run_reset(force, session.as_deref()),
        Commands::SendAnalytics { payload } => {
            analytics::run_send(&payload)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Resolve the agent: explicit settings first, then repository markers
/// unless auto-detection is disabled, then the default.
pub(crate) fn resolve_agent(settings: &Settings, ctx: &RepoContext) -> AgentKind {
    if !settings.agent.is_empty() {
        if let Some(agent) = AgentKind::from_type_name(&settings.agent) {
            return agent;
        }
        tracing::warn!(agent = %settings.agent, "unknown agent in settings, falling back");
    }
    if settings.agent_auto_detect != Some(false) {
        if let Some(agent) = agent::detect(&ctx.root) {
            return agent;
        }
    }
    DEFAULT_AGENT
}
