//! Repository discovery and the ref/path vocabulary of the recorder.
//!
//! Every ref written by the recorder lives under `refs/heads/entire/`:
//! a fixed metadata branch (`entire/sessions`) plus one shadow branch per
//! base commit, suffixed with the worktree id so linked worktrees of the
//! same repository never collide.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

/// Branch holding per-checkpoint metadata under sharded paths.
pub const METADATA_BRANCH: &str = "entire/sessions";
pub const METADATA_REF: &str = "refs/heads/entire/sessions";

/// Common prefix of all recorder branches, shadow branches included.
pub const SHADOW_BRANCH_PREFIX: &str = "entire/";

/// Directory under the git dir holding one state file per session.
pub const STATE_DIR_NAME: &str = "entire-sessions";

/// Repo-relative scratch directory the agent hooks write metadata into.
pub const METADATA_SCRATCH_DIR: &str = ".entire/metadata";

pub const SETTINGS_FILE: &str = ".entire/settings.json";
pub const SETTINGS_LOCAL_FILE: &str = ".entire/settings.local.json";

// File names inside a checkpoint's sharded metadata directory.
pub const TRANSCRIPT_FILE: &str = "full.jsonl";
pub const METADATA_FILE: &str = "metadata.json";
pub const PROMPT_FILE: &str = "prompt.txt";
pub const CONTEXT_FILE: &str = "context.md";
pub const CONTENT_HASH_FILE: &str = "content_hash";

/// Worktree id of the primary worktree.
pub const MAIN_WORKTREE_ID: &str = "main";

/// Number of base-commit hex chars encoded in a shadow branch name.
pub const SHADOW_HASH_LEN: usize = 7;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("not a git repository")]
    NotARepo,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Find the repository root by walking upward from `from` looking for a
/// `.git` entry (directory, or file for linked worktrees).
pub fn find_repo_root(from: &Path) -> Option<PathBuf> {
    let mut dir = from.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Resolve the git directory for the worktree at `path`, absolute.
///
/// For a linked worktree this is `<main>/.git/worktrees/<name>`, which is why
/// `git rev-parse` does the resolution rather than a bare `.git` join.
pub fn git_dir_in(path: &Path) -> Result<PathBuf, PathError> {
    let output = git_output(path, &["rev-parse", "--git-dir"]).ok_or(PathError::NotARepo)?;
    let git_dir = PathBuf::from(output);
    if git_dir.is_absolute() {
        Ok(git_dir)
    } else {
        Ok(path.join(git_dir))
    }
}

/// Stable identifier for a worktree, used to namespace shadow branches:
/// `"main"` for the primary worktree, the worktree name for linked ones.
pub fn worktree_id(git_dir: &Path) -> String {
    let parent_is_worktrees = git_dir
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|name| name == "worktrees");
    if parent_is_worktrees {
        if let Some(name) = git_dir.file_name().and_then(|n| n.to_str()) {
            return name.to_string();
        }
    }
    MAIN_WORKTREE_ID.to_string()
}

/// Shadow branch name for a base commit in a given worktree. The primary
/// worktree's suffix is collapsed away for readability.
pub fn shadow_branch_name(base_commit: &str, worktree_id: &str) -> String {
    let short = &base_commit[..SHADOW_HASH_LEN.min(base_commit.len())];
    if worktree_id == MAIN_WORKTREE_ID {
        format!("{SHADOW_BRANCH_PREFIX}{short}")
    } else {
        format!("{SHADOW_BRANCH_PREFIX}{short}-{worktree_id}")
    }
}

static SHADOW_BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^entire/[0-9a-fA-F]{7,}$").unwrap());

static WORKTREE_SHADOW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^entire/([0-9a-fA-F]{7,})(?:-(.+))?$").unwrap());

/// Whether `name` is a plain shadow branch: `entire/` followed by at least
/// seven hex chars. The metadata branch is never a shadow branch.
pub fn is_shadow_branch(name: &str) -> bool {
    name != METADATA_BRANCH && SHADOW_BRANCH_RE.is_match(name)
}

/// The base-commit hex encoded in a shadow branch name, plain or
/// worktree-suffixed. `None` for anything that is not a shadow branch.
pub fn shadow_branch_hex(name: &str) -> Option<&str> {
    if name == METADATA_BRANCH {
        return None;
    }
    WORKTREE_SHADOW_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Whether a shadow branch belongs to the given worktree.
pub fn shadow_branch_in_worktree(name: &str, worktree_id: &str) -> bool {
    if name == METADATA_BRANCH {
        return false;
    }
    let Some(captures) = WORKTREE_SHADOW_RE.captures(name) else {
        return false;
    };
    match captures.get(2) {
        Some(suffix) => suffix.as_str() == worktree_id,
        None => worktree_id == MAIN_WORKTREE_ID,
    }
}

/// Resolved location of the repository the recorder operates on.
///
/// Constructed once per invocation and passed down explicitly; nothing in
/// the engine consults the process working directory after this point.
#[derive(Debug, Clone)]
pub struct RepoContext {
    pub root: PathBuf,
    pub git_dir: PathBuf,
    pub worktree_id: String,
}

impl RepoContext {
    /// Discover the repository containing the current working directory.
    pub fn discover() -> Result<Self, PathError> {
        let cwd = std::env::current_dir()?;
        Self::at(&cwd)
    }

    /// Resolve the repository containing `path`.
    pub fn at(path: &Path) -> Result<Self, PathError> {
        let root = find_repo_root(path).ok_or(PathError::NotARepo)?;
        let git_dir = git_dir_in(&root)?;
        let worktree_id = worktree_id(&git_dir);
        Ok(Self {
            root,
            git_dir,
            worktree_id,
        })
    }

    /// Directory holding session state files.
    pub fn state_dir(&self) -> PathBuf {
        self.git_dir.join(STATE_DIR_NAME)
    }

    /// Scratch metadata directory an agent hook writes for a session.
    pub fn scratch_dir(&self, session_id: &str) -> PathBuf {
        self.root
            .join(METADATA_SCRATCH_DIR)
            .join(crate::session_id::agent_session_id(session_id))
    }

    pub fn shadow_branch_for(&self, base_commit: &str) -> String {
        shadow_branch_name(base_commit, &self.worktree_id)
    }
}

/// Run `git` in `dir` and return trimmed stdout, or `None` on any failure.
pub fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() {
        None
    } else {
        Some(stdout)
    }
}
