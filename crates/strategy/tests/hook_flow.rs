//! End-to-end hook flows through the strategies against real repositories.

use chrono::Utc;
use std::path::Path;

use entire_core::agent::{AgentKind, HookResponse};
use entire_core::paths::RepoContext;
use entire_git_native::test_utils::{git, init_test_repo};
use entire_git_native::{ops, CheckpointStore};
use entire_strategy::{
    AssumeYes, AutoCommitStrategy, ManualCommitStrategy, Phase, SessionState, StateStore, Strategy,
};

fn manual(ctx: &RepoContext, agent: AgentKind) -> ManualCommitStrategy {
    ManualCommitStrategy::new(ctx.clone(), agent, Box::new(AssumeYes))
}

fn write_claude_transcript(dir: &Path, prompt: &str) -> std::path::PathBuf {
    let path = dir.join("transcript.jsonl");
    let content = format!(
        "{}\n{}\n",
        serde_json::json!({"type": "user", "message": {"content": prompt}}),
        serde_json::json!({"type": "assistant", "message": {"usage": {
            "input_tokens": 120, "output_tokens": 40,
            "cache_creation_input_tokens": 10, "cache_read_input_tokens": 30,
        }}}),
    );
    std::fs::write(&path, content).unwrap();
    path
}

fn write_scratch(ctx: &RepoContext, session_id: &str, prompt: &str) {
    let dir = ctx.scratch_dir(session_id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("full.jsonl"), "{}\n").unwrap();
    std::fs::write(dir.join("prompt.txt"), prompt).unwrap();
    std::fs::write(dir.join("context.md"), "# Context\n").unwrap();
}

#[test]
fn prompt_then_stop_produces_a_published_checkpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    init_test_repo(tmp.path());
    let ctx = RepoContext::at(tmp.path()).unwrap();
    let strategy = manual(&ctx, AgentKind::ClaudeCode);

    // First prompt: clean tree, snapshot dedups against the base commit.
    let response = strategy.on_user_prompt_submit("session-1").unwrap();
    assert_eq!(response, HookResponse::Passthrough);

    let states = StateStore::new(&ctx);
    let state = states.load("session-1").unwrap().unwrap();
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.checkpoint_count, 0, "unchanged tree must not count");
    assert!(state.last_interaction_at.is_some());
    let first_interaction = state.last_interaction_at.unwrap();

    // The agent edits a file, then the turn ends.
    std::fs::write(tmp.path().join("feature.rs"), "pub fn feature() {}\n").unwrap();
    write_scratch(&ctx, "session-1", "add the feature\n");
    let transcript = write_claude_transcript(outside.path(), "add the feature");

    let response = strategy.on_stop("session-1", Some(&transcript)).unwrap();
    assert_eq!(response, HookResponse::Passthrough);

    let state = states.load("session-1").unwrap().unwrap();
    assert_eq!(state.checkpoint_count, 1);
    assert_eq!(state.phase, Phase::ActiveCommitted);
    assert!(state.last_interaction_at.unwrap() >= first_interaction);

    // The snapshot landed on the shadow branch, the metadata on
    // entire/sessions, and they agree on the checkpoint id.
    let store = CheckpointStore::from_context(&ctx);
    let committed = store.list_committed().unwrap();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].agent, "Claude Code");
    assert_eq!(committed[0].branch, "main");

    let points = strategy.get_rewind_points(10).unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].checkpoint_id, committed[0].checkpoint_id.as_str());
    assert_eq!(points[0].prompt, "add the feature");

    let log = strategy.get_checkpoint_log(&points[0]).unwrap();
    assert!(!log.is_empty());

    let read = store.read_committed(committed[0].checkpoint_id.as_str()).unwrap();
    assert_eq!(read.metadata.token_usage.as_ref().unwrap().total(), 200);
    assert_eq!(read.metadata.strategy, "manual-commit");

    // A second stop without further edits is deduplicated.
    let response = strategy.on_stop("session-1", Some(&transcript)).unwrap();
    assert_eq!(response, HookResponse::Passthrough);
    let state = states.load("session-1").unwrap().unwrap();
    assert_eq!(state.checkpoint_count, 1);
}

#[test]
fn gemini_session_blocked_by_claude_checkpoints() {
    let tmp = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    init_test_repo(tmp.path());
    git(tmp.path(), &["checkout", "-b", "feature/test"]);
    let ctx = RepoContext::at(tmp.path()).unwrap();

    // Claude session A records a checkpoint.
    let claude = manual(&ctx, AgentKind::ClaudeCode);
    claude.on_user_prompt_submit("aaaa-claude-session").unwrap();
    std::fs::write(tmp.path().join("file.txt"), "content from Claude session\n").unwrap();
    write_scratch(&ctx, "aaaa-claude-session", "add file\n");
    let transcript = write_claude_transcript(outside.path(), "add file");
    claude.on_stop("aaaa-claude-session", Some(&transcript)).unwrap();

    let states = StateStore::new(&ctx);
    let state_a = states.load("aaaa-claude-session").unwrap().unwrap();
    assert!(state_a.checkpoint_count > 0);
    assert_eq!(state_a.agent_type, "Claude Code");

    // Gemini session B fires its first BeforeAgent on the same HEAD.
    let gemini = manual(&ctx, AgentKind::Gemini);
    let response = gemini.on_before_agent("bbbb-gemini-session").unwrap();
    let HookResponse::Block { reason } = &response else {
        panic!("expected a blocking response, got {response:?}");
    };
    assert!(reason.contains("another active session with uncommitted changes"));
    // The resume command belongs to the conflicting session's agent.
    assert!(reason.contains("claude -r aaaa-claude-session"), "reason: {reason}");
    assert!(!reason.contains("gemini --resume"), "reason: {reason}");

    // Rendered for Gemini, the decision uses its own dialect.
    let rendered = response.render(AgentKind::Gemini).unwrap();
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(value["decision"], "block");

    let state_b = states.load("bbbb-gemini-session").unwrap().unwrap();
    assert!(state_b.concurrent_warning_shown);

    // The warned session's next prompt passes through silently.
    let response = gemini.on_before_agent("bbbb-gemini-session").unwrap();
    assert_eq!(response, HookResponse::Passthrough);
    let state_b = states.load("bbbb-gemini-session").unwrap().unwrap();
    assert!(state_b.concurrent_warning_shown);
}

#[test]
fn claude_session_blocked_by_gemini_shows_gemini_resume() {
    let tmp = tempfile::tempdir().unwrap();
    init_test_repo(tmp.path());
    let ctx = RepoContext::at(tmp.path()).unwrap();

    // A Gemini session already holds a checkpoint (state crafted directly).
    let head = entire_core::paths::git_output(&ctx.root, &["rev-parse", "HEAD"]).unwrap();
    let states = StateStore::new(&ctx);
    states
        .save(&SessionState {
            session_id: "gggg-gemini-session".to_string(),
            agent_type: "Gemini CLI".to_string(),
            strategy: "manual-commit".to_string(),
            base_commit: head.clone(),
            shadow_branch: format!("entire/{}", &head[..7]),
            phase: Phase::Active,
            started_at: Utc::now(),
            last_interaction_at: Some(Utc::now()),
            checkpoint_count: 1,
            step_count: 1,
            concurrent_warning_shown: false,
            parent_id: String::new(),
            tool_use_id: String::new(),
        })
        .unwrap();

    let claude = manual(&ctx, AgentKind::ClaudeCode);
    let response = claude.on_user_prompt_submit("cccc-claude-session").unwrap();
    let HookResponse::Block { reason } = &response else {
        panic!("expected a blocking response, got {response:?}");
    };
    assert!(reason.contains("gemini --resume gggg-gemini-session"), "reason: {reason}");
    assert!(reason.contains("close Gemini CLI"), "reason: {reason}");
    assert!(!reason.contains("claude -r"), "reason: {reason}");

    let rendered = response.render(AgentKind::ClaudeCode).unwrap();
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(value["continue"], false);
    assert!(value["stopReason"].as_str().unwrap().contains("gemini --resume"));
}

#[test]
fn no_block_when_other_session_has_no_checkpoints() {
    let tmp = tempfile::tempdir().unwrap();
    init_test_repo(tmp.path());
    let ctx = RepoContext::at(tmp.path()).unwrap();

    let gemini = manual(&ctx, AgentKind::Gemini);
    gemini.on_before_agent("first-session").unwrap();

    let states = StateStore::new(&ctx);
    assert_eq!(states.load("first-session").unwrap().unwrap().checkpoint_count, 0);

    let response = gemini.on_before_agent("second-session").unwrap();
    assert_eq!(response, HookResponse::Passthrough);
    let second = states.load("second-session").unwrap().unwrap();
    assert!(!second.concurrent_warning_shown);
}

#[test]
fn sub_sessions_do_not_trigger_the_gate() {
    let tmp = tempfile::tempdir().unwrap();
    init_test_repo(tmp.path());
    let ctx = RepoContext::at(tmp.path()).unwrap();
    let head = entire_core::paths::git_output(&ctx.root, &["rev-parse", "HEAD"]).unwrap();

    let states = StateStore::new(&ctx);
    states
        .save(&SessionState {
            session_id: "parent-spawned-task".to_string(),
            agent_type: "Claude Code".to_string(),
            strategy: "manual-commit".to_string(),
            base_commit: head.clone(),
            shadow_branch: format!("entire/{}", &head[..7]),
            phase: Phase::Active,
            started_at: Utc::now(),
            last_interaction_at: None,
            checkpoint_count: 3,
            step_count: 3,
            concurrent_warning_shown: false,
            parent_id: "the-parent".to_string(),
            tool_use_id: "toolu_123".to_string(),
        })
        .unwrap();

    let claude = manual(&ctx, AgentKind::ClaudeCode);
    let response = claude.on_user_prompt_submit("new-session").unwrap();
    assert_eq!(response, HookResponse::Passthrough);
}

#[test]
fn reset_force_clears_states_and_shadow_branch() {
    let tmp = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    init_test_repo(tmp.path());
    let ctx = RepoContext::at(tmp.path()).unwrap();
    let head = entire_core::paths::git_output(&ctx.root, &["rev-parse", "HEAD"]).unwrap();

    let claude = manual(&ctx, AgentKind::ClaudeCode);
    claude.on_user_prompt_submit("reset-session-1").unwrap();
    std::fs::write(tmp.path().join("a.txt"), "a\n").unwrap();
    let transcript = write_claude_transcript(outside.path(), "work");
    claude.on_stop("reset-session-1", Some(&transcript)).unwrap();

    // A second session bound to the same base commit.
    let states = StateStore::new(&ctx);
    states
        .save(&SessionState {
            session_id: "reset-session-2".to_string(),
            agent_type: "Claude Code".to_string(),
            strategy: "manual-commit".to_string(),
            base_commit: head.clone(),
            shadow_branch: format!("entire/{}", &head[..7]),
            phase: Phase::ActiveCommitted,
            started_at: Utc::now(),
            last_interaction_at: None,
            checkpoint_count: 2,
            step_count: 2,
            concurrent_warning_shown: false,
            parent_id: String::new(),
            tool_use_id: String::new(),
        })
        .unwrap();

    let shadow_ref = format!("refs/heads/entire/{}", &head[..7]);
    let repo = ops::open_repo(tmp.path()).unwrap();
    assert!(ops::find_ref_tip(&repo, &shadow_ref).unwrap().is_some());

    claude.reset(true).unwrap();

    assert!(states.load("reset-session-1").unwrap().is_none());
    assert!(states.load("reset-session-2").unwrap().is_none());
    let repo = ops::open_repo(tmp.path()).unwrap();
    assert!(ops::find_ref_tip(&repo, &shadow_ref).unwrap().is_none());

    // Nothing left to reset: a no-op, not an error.
    claude.reset(true).unwrap();
}

#[test]
fn auto_commit_checkpoints_land_on_the_active_branch() {
    let tmp = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    init_test_repo(tmp.path());
    let ctx = RepoContext::at(tmp.path()).unwrap();
    let head_before = entire_core::paths::git_output(&ctx.root, &["rev-parse", "HEAD"]).unwrap();

    let strategy = AutoCommitStrategy::new(ctx.clone(), AgentKind::ClaudeCode);
    strategy.on_user_prompt_submit("auto-session").unwrap();

    std::fs::write(tmp.path().join("auto.txt"), "auto content\n").unwrap();
    let transcript = write_claude_transcript(outside.path(), "auto work");
    strategy.on_stop("auto-session", Some(&transcript)).unwrap();

    let head_after = entire_core::paths::git_output(&ctx.root, &["rev-parse", "HEAD"]).unwrap();
    assert_ne!(head_before, head_after, "checkpoint commit should advance the branch");
    let subject = git(tmp.path(), &["log", "-1", "--format=%s"]);
    assert_eq!(subject, "chore(entire): checkpoint 1");

    let states = StateStore::new(&ctx);
    let state = states.load("auto-session").unwrap().unwrap();
    assert_eq!(state.checkpoint_count, 1);
    assert_eq!(state.phase, Phase::ActiveCommitted);
    assert!(state.shadow_branch.is_empty());

    // Reset is git's job under auto-commit.
    assert!(matches!(
        strategy.reset(true),
        Err(entire_strategy::StrategyError::StrategyMismatch(_))
    ));

    let points = strategy.get_rewind_points(10).unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].message, "chore(entire): checkpoint 1");
    assert_eq!(
        strategy.get_session_metadata_ref("auto-session"),
        "entire/sessions"
    );
}

#[test]
fn legacy_session_ids_share_state_with_normalized_ids() {
    let tmp = tempfile::tempdir().unwrap();
    init_test_repo(tmp.path());
    let ctx = RepoContext::at(tmp.path()).unwrap();

    let claude = manual(&ctx, AgentKind::ClaudeCode);
    claude
        .on_user_prompt_submit("2026-01-23-f736da47-b2ca-4f86-bb32-a1bbe582e464")
        .unwrap();

    let states = StateStore::new(&ctx);
    let state = states
        .load("f736da47-b2ca-4f86-bb32-a1bbe582e464")
        .unwrap()
        .unwrap();
    assert_eq!(
        state.session_id,
        "2026-01-23-f736da47-b2ca-4f86-bb32-a1bbe582e464"
    );
}
