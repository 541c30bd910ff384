//! Hook-event plumbing shared by the strategies: state initialization, the
//! concurrent-session gate, and metadata publication.

use chrono::Utc;
use tracing::info;

use entire_core::agent::{AgentKind, HookResponse, DEFAULT_AGENT};
use entire_core::paths::{self, RepoContext};
use entire_core::session_id::agent_session_id;
use entire_git_native::{CheckpointStore, WriteCommittedOptions, WriteResult};

use crate::error::StrategyError;
use crate::state::{Phase, SessionState, StateStore};
use crate::transcript;
use crate::worktree;

/// Load a session's state, creating and persisting it on the first event.
pub(crate) fn load_or_init(
    states: &StateStore,
    agent: AgentKind,
    strategy_name: &str,
    shadow_branch: String,
    session_id: &str,
    head: &str,
) -> Result<SessionState, StrategyError> {
    if let Some(state) = states.load(session_id)? {
        return Ok(state);
    }
    let state = SessionState {
        session_id: session_id.to_string(),
        agent_type: agent.display_name().to_string(),
        strategy: strategy_name.to_string(),
        base_commit: head.to_string(),
        shadow_branch,
        phase: Phase::Active,
        started_at: Utc::now(),
        last_interaction_at: None,
        checkpoint_count: 0,
        step_count: 0,
        concurrent_warning_shown: false,
        parent_id: String::new(),
        tool_use_id: String::new(),
    };
    states.save(&state)?;
    info!(session = session_id, base = state.base_short(), "initialized session state");
    Ok(state)
}

/// The concurrent-session gate, evaluated before any checkpoint write.
///
/// If another session on the same base commit already holds checkpoints,
/// block this session's prompt once with a resume instruction for the
/// *conflicting* session's agent: a Gemini user who collides with a Claude
/// session needs `claude -r`, not their own resume command. The warned
/// session's later events pass through silently.
pub(crate) fn concurrent_gate(
    states: &StateStore,
    state: &mut SessionState,
    head: &str,
) -> Result<Option<HookResponse>, StrategyError> {
    let self_id = agent_session_id(&state.session_id).to_string();
    let head_short = &head[..7.min(head.len())];

    for other in states.list()? {
        if agent_session_id(&other.session_id) == self_id {
            continue;
        }
        if other.is_sub_session() || !other.phase.is_active() || other.checkpoint_count == 0 {
            continue;
        }
        if other.base_short() != head_short {
            continue;
        }

        let other_agent = AgentKind::from_type_name(&other.agent_type).unwrap_or(DEFAULT_AGENT);
        let reason = format!(
            "Entire found another active session with uncommitted changes on this commit, \
             started by {}. To continue that session, {}. \
             Or run `entire reset` to discard its checkpoints.",
            other.agent_type,
            other_agent.resume_hint(&other.session_id),
        );

        state.concurrent_warning_shown = true;
        states.save(state)?;
        info!(
            session = %state.session_id,
            conflicting = %other.session_id,
            "blocking prompt: concurrent session holds checkpoints"
        );
        return Ok(Some(HookResponse::block(reason)));
    }
    Ok(None)
}

/// Publish a checkpoint's transcript and metadata to the metadata branch.
pub(crate) fn publish_metadata(
    repo: &RepoContext,
    store: &CheckpointStore,
    agent: AgentKind,
    strategy_name: &str,
    state: &SessionState,
    snapshot: &WriteResult,
    transcript_bytes: &[u8],
    files_touched: &[String],
) -> Result<(), StrategyError> {
    let scratch = repo.scratch_dir(&state.session_id);
    let prompts = std::fs::read_to_string(scratch.join(paths::PROMPT_FILE))
        .ok()
        .or_else(|| transcript::first_prompt(agent, transcript_bytes));
    let context = std::fs::read_to_string(scratch.join(paths::CONTEXT_FILE)).ok();
    let (author_name, author_email) = worktree::author_identity(repo);
    let branch = worktree::current_branch(repo);

    store.write_committed(&WriteCommittedOptions {
        checkpoint_id: snapshot.checkpoint_id.clone(),
        session_id: &state.session_id,
        strategy: strategy_name,
        agent_type: agent.display_name(),
        branch: &branch,
        transcript: transcript_bytes,
        prompts: prompts.as_deref(),
        context: context.as_deref(),
        content_hash: Some(&snapshot.tree_hash),
        files_touched,
        token_usage: transcript::extract_token_usage(agent, transcript_bytes),
        author_name: &author_name,
        author_email: &author_email,
    })?;
    Ok(())
}
