use std::path::Path;

/// Whether a git sequence operation (rebase, cherry-pick, revert) is in
/// progress in this worktree's git dir. Checkpointing mid-sequence would
/// snapshot half-applied states, so hooks become silent no-ops instead.
pub fn in_progress(git_dir: &Path) -> bool {
    git_dir.join("rebase-merge").exists()
        || git_dir.join("rebase-apply").exists()
        || git_dir.join("CHERRY_PICK_HEAD").exists()
        || git_dir.join("REVERT_HEAD").exists()
}
