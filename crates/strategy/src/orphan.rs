//! Orphaned-session detection.
//!
//! A hook process killed mid-session leaves its state file in an active
//! phase forever. Such a state is reclaimed only when all three hold: it is
//! older than the grace period, it is still in an active phase, and its
//! storage evidence is gone (no shadow branch for its base commit; for
//! auto-commit, a base commit no longer reachable from HEAD). Fresh
//! sessions are never orphaned, no matter what else looks wrong.

use chrono::{Duration, Utc};

use entire_core::paths::{self, RepoContext};
use entire_core::settings::STRATEGY_AUTO_COMMIT;
use entire_git_native::ops;

use crate::error::StrategyError;
use crate::state::StateStore;
use crate::worktree;

/// Default grace period before an abandoned-looking session may be
/// reclaimed.
pub fn default_grace() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedSession {
    pub id: String,
    pub reason: String,
}

/// Sessions whose storage evidence has vanished while still active.
pub fn list_orphaned(
    repo: &RepoContext,
    states: &StateStore,
    grace: Duration,
) -> Result<Vec<OrphanedSession>, StrategyError> {
    let branches = ops::list_branches(&repo.root, paths::SHADOW_BRANCH_PREFIX)?;
    let shadow_hexes: Vec<String> = branches
        .iter()
        .filter(|name| paths::shadow_branch_in_worktree(name, &repo.worktree_id))
        .filter_map(|name| paths::shadow_branch_hex(name))
        .map(str::to_string)
        .collect();

    let now = Utc::now();
    let head = worktree::head_commit(repo).ok();

    let mut orphaned = Vec::new();
    for state in states.list()? {
        if now - state.started_at <= grace {
            continue;
        }
        if !state.phase.is_active() {
            continue;
        }

        if state.strategy == STRATEGY_AUTO_COMMIT {
            let reachable = head
                .as_deref()
                .is_some_and(|head| worktree::is_ancestor(repo, &state.base_commit, head));
            if !reachable {
                orphaned.push(OrphanedSession {
                    reason: format!(
                        "base commit {} is no longer reachable from HEAD",
                        state.base_short()
                    ),
                    id: state.session_id,
                });
            }
            continue;
        }

        // Shadow branches encode only the first 7 hex chars of the base
        // commit; compare prefixes, never full hashes.
        let base_short = state.base_short();
        let has_branch = shadow_hexes
            .iter()
            .any(|hex| hex[..7.min(hex.len())].eq_ignore_ascii_case(base_short));
        if !has_branch {
            orphaned.push(OrphanedSession {
                reason: format!("no shadow branch for base commit {base_short}"),
                id: state.session_id,
            });
        }
    }
    Ok(orphaned)
}

/// Mark every orphaned session's state `ORPHANED` and return what was
/// reclaimed. Marked states drop out of the concurrent-session gate and of
/// future sweeps; their files stay on disk for inspection until a reset.
pub fn sweep(
    repo: &RepoContext,
    states: &StateStore,
    grace: Duration,
) -> Result<Vec<OrphanedSession>, StrategyError> {
    let orphaned = list_orphaned(repo, states, grace)?;
    for orphan in &orphaned {
        if let Some(mut state) = states.load(&orphan.id)? {
            state.phase = crate::state::Phase::Orphaned;
            states.save(&state)?;
        }
    }
    Ok(orphaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Phase, SessionState};
    use entire_git_native::test_utils::{git, init_test_repo};

    fn state_started_hours_ago(id: &str, base: &str, hours: i64) -> SessionState {
        SessionState {
            session_id: id.to_string(),
            agent_type: "Claude Code".to_string(),
            strategy: "manual-commit".to_string(),
            base_commit: base.to_string(),
            shadow_branch: format!("entire/{}", &base[..7]),
            phase: Phase::Active,
            started_at: Utc::now() - Duration::hours(hours),
            last_interaction_at: None,
            checkpoint_count: 1,
            step_count: 1,
            concurrent_warning_shown: false,
            parent_id: String::new(),
            tool_use_id: String::new(),
        }
    }

    fn setup() -> (tempfile::TempDir, RepoContext, StateStore, String) {
        let tmp = tempfile::tempdir().unwrap();
        let head = init_test_repo(tmp.path());
        let repo = RepoContext::at(tmp.path()).unwrap();
        let states = StateStore::new(&repo);
        (tmp, repo, states, head)
    }

    #[test]
    fn fresh_sessions_are_never_orphaned() {
        let (_tmp, repo, states, head) = setup();
        // No shadow branch at all, but the session just started.
        states
            .save(&state_started_hours_ago("recent-session-123", &head, 0))
            .unwrap();

        let orphaned = list_orphaned(&repo, &states, default_grace()).unwrap();
        assert!(
            orphaned.iter().all(|o| o.id != "recent-session-123"),
            "recently started session must not be orphaned: {orphaned:?}"
        );
    }

    #[test]
    fn shadow_branch_prefix_match_protects_sessions() {
        let (tmp, repo, states, head) = setup();
        // Shadow branch carries the 7-char hash; state carries all 40.
        git(
            tmp.path(),
            &["branch", &format!("entire/{}", &head[..7]), &head],
        );
        states
            .save(&state_started_hours_ago("session-with-shadow-branch", &head, 2))
            .unwrap();

        let orphaned = list_orphaned(&repo, &states, default_grace()).unwrap();
        assert!(
            orphaned.is_empty(),
            "7-vs-40 hex comparison must match by prefix: {orphaned:?}"
        );
    }

    #[test]
    fn stale_session_without_branch_is_orphaned() {
        let (_tmp, repo, states, head) = setup();
        states
            .save(&state_started_hours_ago("stale-session", &head, 2))
            .unwrap();

        let orphaned = list_orphaned(&repo, &states, default_grace()).unwrap();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].id, "stale-session");
        assert!(orphaned[0].reason.contains("no shadow branch"));
    }

    #[test]
    fn inactive_phases_are_ignored() {
        let (_tmp, repo, states, head) = setup();
        let mut state = state_started_hours_ago("ended-session", &head, 5);
        state.phase = Phase::Ended;
        states.save(&state).unwrap();

        assert!(list_orphaned(&repo, &states, default_grace())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn other_worktrees_branches_do_not_count() {
        let (tmp, repo, states, head) = setup();
        // Branch exists, but belongs to a different worktree.
        git(
            tmp.path(),
            &["branch", &format!("entire/{}-otherwt", &head[..7]), &head],
        );
        states
            .save(&state_started_hours_ago("cross-worktree", &head, 2))
            .unwrap();

        let orphaned = list_orphaned(&repo, &states, default_grace()).unwrap();
        assert_eq!(orphaned.len(), 1);
    }

    #[test]
    fn sweep_marks_states_orphaned() {
        let (_tmp, repo, states, head) = setup();
        states
            .save(&state_started_hours_ago("stale-session", &head, 2))
            .unwrap();

        let swept = sweep(&repo, &states, default_grace()).unwrap();
        assert_eq!(swept.len(), 1);
        let state = states.load("stale-session").unwrap().unwrap();
        assert_eq!(state.phase, Phase::Orphaned);

        // An orphaned phase is no longer active, so the next sweep is empty.
        assert!(sweep(&repo, &states, default_grace()).unwrap().is_empty());
    }

    #[test]
    fn auto_commit_orphaned_when_base_unreachable() {
        let (_tmp, repo, states, head) = setup();
        let mut reachable = state_started_hours_ago("auto-ok", &head, 2);
        reachable.strategy = "auto-commit".to_string();
        reachable.shadow_branch = String::new();
        states.save(&reachable).unwrap();

        let mut unreachable = state_started_hours_ago(
            "auto-gone",
            "0123456789abcdef0123456789abcdef01234567",
            2,
        );
        unreachable.strategy = "auto-commit".to_string();
        unreachable.shadow_branch = String::new();
        states.save(&unreachable).unwrap();

        let orphaned = list_orphaned(&repo, &states, default_grace()).unwrap();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].id, "auto-gone");
        assert!(orphaned[0].reason.contains("unreachable") || orphaned[0].reason.contains("reachable"));
    }
}
