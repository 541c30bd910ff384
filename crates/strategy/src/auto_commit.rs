//! The auto-commit strategy: checkpoints are ordinary commits on the active
//! branch, so the user's history carries the agent's work directly. Rewind
//! and cleanup use git itself; only the metadata branch is recorder-owned.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, warn};

use entire_core::agent::{AgentKind, HookResponse};
use entire_core::paths::{RepoContext, METADATA_BRANCH};
use entire_core::settings::STRATEGY_AUTO_COMMIT;
use entire_git_native::{CheckpointStore, WriteTemporaryOptions};

use crate::error::StrategyError;
use crate::events;
use crate::rewind::{walk_rewind_points, RewindPoint};
use crate::sequence;
use crate::state::{Phase, StateStore};
use crate::worktree;
use crate::Strategy;

pub struct AutoCommitStrategy {
    repo: RepoContext,
    agent: AgentKind,
    store: CheckpointStore,
    states: StateStore,
}

impl AutoCommitStrategy {
    pub fn new(repo: RepoContext, agent: AgentKind) -> Self {
        let store = CheckpointStore::from_context(&repo);
        let states = StateStore::new(&repo);
        Self {
            repo,
            agent,
            store,
            states,
        }
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
            STRATEGY_AUTO_COMMIT,
            String::new(), // no shadow branch under auto-commit
            session_id,
            &head,
        )?;
        if state.concurrent_warning_shown {
            return Ok(HookResponse::Passthrough);
        }
        if let Some(block) = events::concurrent_gate(&self.states, &mut state, &head)? {
            return Ok(block);
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
            return Ok(HookResponse::Passthrough);
        };
        if state.concurrent_warning_shown {
            return Ok(HookResponse::Passthrough);
        }

        let head = worktree::head_commit(&self.repo)?;
        if let Some(block) = events::concurrent_gate(&self.states, &mut state, &head)? {
            return Ok(block);
        }

        let branch = worktree::current_branch(&self.repo);
        if branch.is_empty() {
            warn!("detached HEAD, auto-commit checkpoint skipped");
            state.last_interaction_at = Some(Utc::now());
            self.states.save(&state)?;
            return Ok(HookResponse::Passthrough);
        }

        let modified = worktree::modified_files(&self.repo);
        let (author_name, author_email) = worktree::author_identity(&self.repo);
        let scratch = self.repo.scratch_dir(&state.session_id);
        let message = format!("chore(entire): checkpoint {}", state.checkpoint_count + 1);

        let snapshot = self.store.write_to_branch(
            &branch,
            &WriteTemporaryOptions {
                session_id: &state.session_id,
                base_commit: &head,
                modified_files: &modified,
                metadata_dir: scratch.exists().then_some(scratch.as_path()),
                commit_message: &message,
                author_name: &author_name,
                author_email: &author_email,
                agent_type: self.agent.display_name(),
            },
        )?;

        if !snapshot.skipped {
            state.checkpoint_count += 1;
            state.step_count += 1;

            if let Some(path) = transcript_path {
                match std::fs::read(path) {
                    Ok(transcript) if !transcript.is_empty() => {
                        events::publish_metadata(
                            &self.repo,
                            &self.store,
                            self.agent,
                            STRATEGY_AUTO_COMMIT,
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
        }

        state.last_interaction_at = Some(Utc::now());
        self.states.save(&state)?;
        Ok(HookResponse::Passthrough)
    }
}

impl Strategy for AutoCommitStrategy {
    fn name(&self) -> &'static str {
        STRATEGY_AUTO_COMMIT
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

    /// Checkpoints live on the user's own branch; rewinding is plain git
    /// (`git reset --hard <commit>`), not a recorder operation.
    fn reset(&self, _force: bool) -> Result<(), StrategyError> {
        Err(StrategyError::StrategyMismatch(
            STRATEGY_AUTO_COMMIT.to_string(),
        ))
    }

    fn reset_session(&self, _session_id: &str) -> Result<(), StrategyError> {
        Err(StrategyError::StrategyMismatch(
            STRATEGY_AUTO_COMMIT.to_string(),
        ))
    }

    fn get_rewind_points(&self, limit: usize) -> Result<Vec<RewindPoint>, StrategyError> {
        walk_rewind_points(&self.store, "HEAD", limit)
    }

    fn get_session_metadata_ref(&self, _session_id: &str) -> String {
        METADATA_BRANCH.to_string()
    }

    fn get_checkpoint_log(&self, point: &RewindPoint) -> Result<Vec<u8>, StrategyError> {
        Ok(self.store.read_committed(&point.checkpoint_id)?.transcript)
    }
}
