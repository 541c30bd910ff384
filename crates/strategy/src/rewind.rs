//! Rewind points: checkpoint commits discovered by walking a branch and
//! reading their trailers, joined with metadata-branch entries when present.

use chrono::{DateTime, Utc};

use entire_core::trailers;
use entire_git_native::{ops, CheckpointStore};

use crate::error::StrategyError;

/// Commits beyond this depth are not searched for checkpoint trailers.
const MAX_COMMITS_TO_WALK: usize = 500;

#[derive(Debug, Clone)]
pub struct RewindPoint {
    /// Full hash of the snapshot commit.
    pub commit: String,
    pub checkpoint_id: String,
    pub session_id: String,
    pub date: DateTime<Utc>,
    /// Subject line of the snapshot commit.
    pub message: String,
    /// First line of the session prompt, when the checkpoint has been
    /// published to the metadata branch.
    pub prompt: String,
}

/// Walk `start_ref` from its tip collecting checkpoint commits, newest
/// first. Commits without an `Entire-Checkpoint` trailer (ordinary user
/// commits on an auto-commit branch) are passed over.
pub fn walk_rewind_points(
    store: &CheckpointStore,
    start_ref: &str,
    limit: usize,
) -> Result<Vec<RewindPoint>, StrategyError> {
    let repo = ops::open_repo(store.repo_root())?;
    let Some(tip) = ops::find_ref_tip(&repo, start_ref)? else {
        return Ok(Vec::new());
    };

    let mut points = Vec::new();
    let mut cursor = Some(tip);
    let mut walked = 0usize;

    while let Some(commit_id) = cursor {
        if points.len() >= limit || walked >= MAX_COMMITS_TO_WALK {
            break;
        }
        walked += 1;

        let message = ops::commit_message(&repo, commit_id)?;
        if let Some(checkpoint_id) = trailers::parse_trailer(&message, trailers::CHECKPOINT_TRAILER)
        {
            let session_id =
                trailers::parse_trailer(&message, trailers::SESSION_TRAILER).unwrap_or_default();
            let seconds = ops::commit_seconds(&repo, commit_id)?;
            let date = DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or_default();

            let prompt = store
                .read_committed(&checkpoint_id)
                .ok()
                .and_then(|r| r.prompts.lines().next().map(str::to_string))
                .unwrap_or_default();

            points.push(RewindPoint {
                commit: commit_id.to_string(),
                session_id,
                date,
                message: message.lines().next().unwrap_or_default().to_string(),
                prompt,
                checkpoint_id,
            });
        }

        cursor = ops::first_parent(&repo, commit_id)?;
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entire_git_native::test_utils::init_test_repo;
    use entire_git_native::WriteTemporaryOptions;

    #[test]
    fn shadow_branch_walk_yields_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let base = init_test_repo(tmp.path());
        let store = CheckpointStore::new(tmp.path(), "main");

        let modified = vec!["work.txt".to_string()];
        let mut hashes = Vec::new();
        for n in 1..=3 {
            std::fs::write(tmp.path().join("work.txt"), format!("rev {n}\n")).unwrap();
            let result = store
                .write_temporary(&WriteTemporaryOptions {
                    session_id: "s-1",
                    base_commit: &base,
                    modified_files: &modified,
                    metadata_dir: None,
                    commit_message: &format!("checkpoint {n}"),
                    author_name: "Test",
                    author_email: "t@t",
                    agent_type: "Claude Code",
                })
                .unwrap();
            hashes.push(result.commit_hash);
        }

        let shadow_ref = format!("refs/heads/entire/{}", &base[..7]);
        let points = walk_rewind_points(&store, &shadow_ref, 10).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].commit, hashes[2]);
        assert_eq!(points[2].commit, hashes[0]);
        assert_eq!(points[0].message, "checkpoint 3");
        assert_eq!(points[0].session_id, "s-1");
        assert!(!points[0].checkpoint_id.is_empty());
    }

    #[test]
    fn missing_ref_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let store = CheckpointStore::new(tmp.path(), "main");
        let points = walk_rewind_points(&store, "refs/heads/entire/0000000", 10).unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn limit_caps_the_walk() {
        let tmp = tempfile::tempdir().unwrap();
        let base = init_test_repo(tmp.path());
        let store = CheckpointStore::new(tmp.path(), "main");

        let modified = vec!["work.txt".to_string()];
        for n in 1..=5 {
            std::fs::write(tmp.path().join("work.txt"), format!("rev {n}\n")).unwrap();
            store
                .write_temporary(&WriteTemporaryOptions {
                    session_id: "s-1",
                    base_commit: &base,
                    modified_files: &modified,
                    metadata_dir: None,
                    commit_message: &format!("checkpoint {n}"),
                    author_name: "Test",
                    author_email: "t@t",
                    agent_type: "Claude Code",
                })
                .unwrap();
        }

        let shadow_ref = format!("refs/heads/entire/{}", &base[..7]);
        let points = walk_rewind_points(&store, &shadow_ref, 2).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].message, "checkpoint 5");
    }
}
