//! `reset`: delete the shadow branch and session state for the current
//! HEAD, or a single session with `--session`. Auto-commit repositories are
//! told to use git directly.

use anyhow::Context;
use std::process::ExitCode;

use entire_core::paths::RepoContext;
use entire_core::settings::Settings;
use entire_strategy::{
    strategy_for, AssumeYes, Confirm, StateStore, Strategy, StrategyError, TerminalConfirm,
};

pub fn run_reset(force: bool, session: Option<&str>) -> anyhow::Result<ExitCode> {
    let ctx = RepoContext::discover().context("not a git repository")?;
    let settings = Settings::load(&ctx.root)?;
    if !settings.enabled {
        println!("Entire is disabled in this repository.");
        return Ok(ExitCode::SUCCESS);
    }

    let agent = crate::resolve_agent(&settings, &ctx);
    let confirm: Box<dyn Confirm> = if force {
        Box::new(AssumeYes)
    } else {
        Box::new(TerminalConfirm)
    };
    let strategy = strategy_for(&settings, ctx.clone(), agent, confirm)?;

    if let Some(session_id) = session {
        let states = StateStore::new(&ctx);
        let Some(state) = states.load(session_id)? else {
            eprintln!("session not found: {session_id}");
            return Ok(ExitCode::from(1));
        };

        if !force {
            let confirmed = TerminalConfirm.confirm(
                &format!("Reset session {session_id}?"),
                &format!(
                    "Phase: {}, Checkpoints: {}",
                    state.phase, state.checkpoint_count
                ),
            )?;
            if !confirmed {
                return Ok(ExitCode::SUCCESS);
            }
        }

        match strategy.reset_session(session_id) {
            Ok(()) => {
                println!(
                    "Session {session_id} has been reset. File changes remain in the working directory."
                );
                Ok(ExitCode::SUCCESS)
            }
            Err(StrategyError::StrategyMismatch(name)) => {
                eprintln!("strategy {name} does not support reset; use git directly");
                Ok(ExitCode::from(1))
            }
            Err(e) => Err(e.into()),
        }
    } else {
        if !force && has_active_sessions_on_head(&ctx)? {
            eprintln!("Active sessions detected on current HEAD.");
            eprintln!("Use --force to override or wait for sessions to finish.");
            return Ok(ExitCode::SUCCESS);
        }

        match strategy.reset(force) {
            Ok(()) => Ok(ExitCode::SUCCESS),
            Err(StrategyError::StrategyMismatch(name)) => {
                eprintln!("strategy {name} does not support reset; use git directly (git reset --hard <commit>)");
                Ok(ExitCode::from(1))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether any session on the current HEAD is still in an active phase.
fn has_active_sessions_on_head(ctx: &RepoContext) -> anyhow::Result<bool> {
    let Some(head) = entire_core::paths::git_output(&ctx.root, &["rev-parse", "HEAD"]) else {
        return Ok(false);
    };
    let head_short = &head[..7.min(head.len())];

    let states = StateStore::new(ctx);
    for state in states.list()? {
        if state.base_short() == head_short && state.phase.is_active() {
            eprintln!(
                "  Active session: {} (phase: {})",
                state.session_id, state.phase
            );
            return Ok(true);
        }
    }
    Ok(false)
}
