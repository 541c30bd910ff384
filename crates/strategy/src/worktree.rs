//! Porcelain-level queries about the current worktree, via the `git`
//! binary. Object and ref writes stay in `entire-git-native`; these answer
//! "where are we" questions the plumbing layer has no business owning.

use std::process::Command;

use entire_core::paths::{git_output, RepoContext};

use crate::error::StrategyError;

/// Full 40-char hex of HEAD.
pub fn head_commit(repo: &RepoContext) -> Result<String, StrategyError> {
    git_output(&repo.root, &["rev-parse", "HEAD"])
        .ok_or_else(|| StrategyError::Other("repository has no commits yet".to_string()))
}

/// Current branch short name; empty in detached HEAD.
pub fn current_branch(repo: &RepoContext) -> String {
    match git_output(&repo.root, &["rev-parse", "--abbrev-ref", "HEAD"]) {
        Some(name) if name != "HEAD" => name,
        _ => String::new(),
    }
}

/// Repo-relative paths with uncommitted changes (staged, unstaged and
/// untracked), excluding the recorder's own scratch directory.
pub fn modified_files(repo: &RepoContext) -> Vec<String> {
    // -uall lists files inside untracked directories individually.
    let Some(output) = git_output(&repo.root, &["status", "--porcelain", "-uall"]) else {
        return Vec::new();
    };

    let mut files = Vec::new();
    for line in output.lines() {
        if line.len() < 4 {
            continue;
        }
        let mut path = &line[3..];
        // Renames are reported as "old -> new"; the new path is what exists.
        if let Some((_, renamed)) = path.split_once(" -> ") {
            path = renamed;
        }
        let path = path.trim_matches('"');
        if path.starts_with(".entire/") {
            continue;
        }
        files.push(path.to_string());
    }
    files
}

/// Commit author identity from git config, with the recorder's identity as
/// fallback when the user has none configured.
pub fn author_identity(repo: &RepoContext) -> (String, String) {
    let name = git_output(&repo.root, &["config", "user.name"])
        .unwrap_or_else(|| "entire".to_string());
    let email = git_output(&repo.root, &["config", "user.email"])
        .unwrap_or_else(|| "cli@entire.io".to_string());
    (name, email)
}

/// Whether `ancestor` is reachable from `descendant`.
pub fn is_ancestor(repo: &RepoContext, ancestor: &str, descendant: &str) -> bool {
    Command::new("git")
        .arg("-C")
        .arg(&repo.root)
        .args(["merge-base", "--is-ancestor", ancestor, descendant])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
