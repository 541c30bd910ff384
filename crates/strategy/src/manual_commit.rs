//! The manual-commit strategy: working-tree snapshots go onto a shadow
//! branch named after the session's base commit, leaving the user's branch
//! untouched until they commit themselves.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, warn};

use entire_core::agent::{AgentKind, HookResponse};
use entire_core::paths::{RepoContext, METADATA_BRANCH};
use entire_core::settings::STRATEGY_MANUAL_COMMIT;
use entire_git_native::{ops, CheckpointStore, WriteResult, WriteTemporaryOptions};

use crate::confirm::Confirm;
use crate::error::StrategyError;
use crate::events;
use crate::rewind::{walk_rewind_points, RewindPoint};
use crate::sequence;
use crate::state::{Phase, SessionState, StateStore};
use crate::worktree;
use crate::Strategy;

pub struct ManualCommitStrategy {
    repo: RepoContext,
    agent: AgentKind,
    store: CheckpointStore,
    states: StateStore,
    confirm: Box<dyn Confirm>,
}

impl ManualCommitStrategy {
    pub fn new(repo: RepoContext, agent: AgentKind, confirm: Box<dyn Confirm>) -> Self {
        let store = CheckpointStore::from_context(&repo);
        let states = StateStore::new(&repo);
        Self {
            repo,
            agent,
            store,
            states,
            confirm,
        }
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    fn handle_prompt(&self, session_id: &str) -> Result<HookResponse, StrategyError> {
        if sequence::in_progress(&self.repo.git_dir) {
            debug!("git sequence operation in progress, skipping hook");
            return Ok(HookResponse::Passthrough);
        }

        let head = worktree::head_commit(&self.repo)?;
        let mut state = events::load_or_init(
            &self.states,
            self.agent,
            STRATEGY_MANUAL_COMMIT,
            self.repo.shadow_branch_for(&head),
            session_id,
            &head,
        )?;
        if state.concurrent_warning_shown {
            debug!(session = session_id, "session was warned, skipping silently");
            return Ok(HookResponse::Passthrough);
        }
        if let Some(block) = events::concurrent_gate(&self.states, &mut state, &head)? {
            return Ok(block);
        }

        let (snapshot, _) = self.snapshot(&state)?;
        if !snapshot.skipped {
            state.checkpoint_count += 1;
            state.step_count += 1;
        }
        if state.phase == Phase::ActiveCommitted {
            state.phase = Phase::Active;
        }
        state.last_interaction_at = Some(Utc::now());
        self.states.save(&state)?;

        Ok(HookResponse::Passthrough)
    }

    fn handle_stop(
        &self,
        session_id: &str,
        transcript_path: Option<&Path>,
    ) -> Result<HookResponse, StrategyError> {
        if sequence::in_progress(&self.repo.git_dir) {
            debug!("git sequence operation in progress, skipping hook");
            return Ok(HookResponse::Passthrough);
        }

        let Some(mut state) = self.states.load(session_id)? else {
            debug!(session = session_id, "stop without session state, skipping");
            return Ok(HookResponse::Passthrough);
        };
        if state.concurrent_warning_shown {
            return Ok(HookResponse::Passthrough);
        }

        let head = worktree::head_commit(&self.repo)?;
        if let Some(block) = events::concurrent_gate(&self.states, &mut state, &head)? {
            return Ok(block);
        }

        let (snapshot, modified) = self.snapshot(&state)?;
        if !snapshot.skipped {
            state.checkpoint_count += 1;
            state.step_count += 1;
        }

        if let Some(path) = transcript_path {
            match std::fs::read(path) {
                Ok(transcript) if !transcript.is_empty() => {
                    events::publish_metadata(
                        &self.repo,
                        &self.store,
                        self.agent,
                        STRATEGY_MANUAL_COMMIT,
                        &state,
                        &snapshot,
                        &transcript,
                        &modified,
                    )?;
                    state.phase = Phase::ActiveCommitted;
                }
                Ok(_) => debug!("transcript is empty, nothing to publish"),
                Err(e) => warn!(path = %path.display(), "cannot read transcript: {e}"),
            }
        }

        state.last_interaction_at = Some(Utc::now());
        self.states.save(&state)?;
        Ok(HookResponse::Passthrough)
    }

    /// Snapshot the working tree onto the session's shadow branch. Returns
    /// the write result and the modified-file set that went into it.
    fn snapshot(&self, state: &SessionState) -> Result<(WriteResult, Vec<String>), StrategyError> {
        let modified = worktree::modified_files(&self.repo);
        let (author_name, author_email) = worktree::author_identity(&self.repo);
        let scratch = self.repo.scratch_dir(&state.session_id);
        let message = format!("checkpoint {}", state.checkpoint_count + 1);

        let result = self.store.write_temporary(&WriteTemporaryOptions {
            session_id: &state.session_id,
            base_commit: &state.base_commit,
            modified_files: &modified,
            metadata_dir: scratch.exists().then_some(scratch.as_path()),
            commit_message: &message,
            author_name: &author_name,
            author_email: &author_email,
            agent_type: self.agent.display_name(),
        })?;
        Ok((result, modified))
    }
}

impl Strategy for ManualCommitStrategy {
    fn name(&self) -> &'static str {
        STRATEGY_MANUAL_COMMIT
    }

    fn on_before_agent(&self, session_id: &str) -> Result<HookResponse, StrategyError> {
        self.handle_prompt(session_id)
    }

    fn on_user_prompt_submit(&self, session_id: &str) -> Result<HookResponse, StrategyError> {
        self.handle_prompt(session_id)
    }

    fn on_stop(
        &self,
        session_id: &str,
        transcript_path: Option<&Path>,
    ) -> Result<HookResponse, StrategyError> {
        self.handle_stop(session_id, transcript_path)
    }

    /// Delete the shadow branch for the current HEAD and clear every
    /// session state bound to that base commit.
    fn reset(&self, force: bool) -> Result<(), StrategyError> {
        let head = worktree::head_commit(&self.repo)?;
        let shadow_branch = self.repo.shadow_branch_for(&head);
        let ref_name = format!("refs/heads/{shadow_branch}");

        let repo = ops::open_repo(&self.repo.root)?;
        let Some(tip) = ops::find_ref_tip(&repo, &ref_name)? else {
            eprintln!("No shadow branch found for {shadow_branch}");
            return Ok(());
        };

        if !force {
            let confirmed = self.confirm.confirm(
                "Delete shadow branch?",
                &format!(
                    "This will delete {shadow_branch} and all associated session state.\n\
                     This action cannot be undone."
                ),
            )?;
            if !confirmed {
                eprintln!("Cancelled");
                return Ok(());
            }
        }

        let head_short = &head[..7];
        for state in self.states.list()? {
            if state.base_short() != head_short {
                continue;
            }
            match self.states.remove(&state.session_id) {
                Ok(()) => eprintln!("Cleared session state for {}", state.session_id),
                Err(e) => eprintln!(
                    "Warning: failed to clear session state for {}: {e}",
                    state.session_id
                ),
            }
        }

        ops::delete_ref(&repo, &ref_name, tip)?;
        eprintln!("Deleted shadow branch {shadow_branch}");
        Ok(())
    }

    /// Clear one session's state. File changes stay in the working tree and
    /// the shadow branch keeps its checkpoints.
    fn reset_session(&self, session_id: &str) -> Result<(), StrategyError> {
        self.states.remove(session_id)?;
        Ok(())
    }

    fn get_rewind_points(&self, limit: usize) -> Result<Vec<RewindPoint>, StrategyError> {
        let head = worktree::head_commit(&self.repo)?;
        let shadow_ref = format!("refs/heads/{}", self.repo.shadow_branch_for(&head));
        walk_rewind_points(&self.store, &shadow_ref, limit)
    }

    fn get_session_metadata_ref(&self, _session_id: &str) -> String {
        METADATA_BRANCH.to_string()
    }

    fn get_checkpoint_log(&self, point: &RewindPoint) -> Result<Vec<u8>, StrategyError> {
        Ok(self.store.read_committed(&point.checkpoint_id)?.transcript)
    }
}
