pub mod auto_commit;
pub mod confirm;
pub mod error;
mod events;
pub mod hooks;
pub mod manual_commit;
pub mod orphan;
pub mod rewind;
pub mod sequence;
pub mod state;
pub mod transcript;
pub mod worktree;

pub use auto_commit::AutoCommitStrategy;
pub use confirm::{AssumeYes, Confirm, TerminalConfirm};
pub use error::StrategyError;
pub use hooks::{parse_hook_input, HookEvent, HookInput};
pub use manual_commit::ManualCommitStrategy;
pub use rewind::RewindPoint;
pub use state::{Phase, SessionState, StateStore};

use std::path::Path;

use entire_core::agent::{AgentKind, HookResponse};
use entire_core::paths::RepoContext;
use entire_core::settings::{Settings, STRATEGY_AUTO_COMMIT, STRATEGY_MANUAL_COMMIT};

/// A checkpoint strategy: how hook events turn into snapshots and metadata.
pub trait Strategy {
    fn name(&self) -> &'static str;

    fn on_before_agent(&self, session_id: &str) -> Result<HookResponse, StrategyError>;
    fn on_user_prompt_submit(&self, session_id: &str) -> Result<HookResponse, StrategyError>;
    fn on_stop(
        &self,
        session_id: &str,
        transcript_path: Option<&Path>,
    ) -> Result<HookResponse, StrategyError>;

    /// Clear all checkpoint state for the current HEAD.
    fn reset(&self, force: bool) -> Result<(), StrategyError>;

    /// Clear a single session's state, leaving branches alone.
    fn reset_session(&self, session_id: &str) -> Result<(), StrategyError>;

    fn get_rewind_points(&self, limit: usize) -> Result<Vec<RewindPoint>, StrategyError>;

    /// Where this session's metadata lives (the metadata branch name).
    fn get_session_metadata_ref(&self, session_id: &str) -> String;

    /// Raw transcript bytes for a rewind point's checkpoint.
    fn get_checkpoint_log(&self, point: &RewindPoint) -> Result<Vec<u8>, StrategyError>;
}

/// Build the strategy configured in `settings`.
pub fn strategy_for(
    settings: &Settings,
    repo: RepoContext,
    agent: AgentKind,
    confirm: Box<dyn Confirm>,
) -> Result<Box<dyn Strategy>, StrategyError> {
    match settings.strategy.as_str() {
        STRATEGY_MANUAL_COMMIT => Ok(Box::new(ManualCommitStrategy::new(repo, agent, confirm))),
        STRATEGY_AUTO_COMMIT => Ok(Box::new(AutoCommitStrategy::new(repo, agent))),
        other => Err(StrategyError::Other(format!("unknown strategy: {other}"))),
    }
}
