//! On-disk session state: one JSON file per session under
//! `<git-dir>/entire-sessions/`.
//!
//! Writes are atomic (temp file, fsync, rename), so concurrent hook
//! processes see either the old or the new state, never a torn one. Files
//! for different sessions never contend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use entire_core::paths::{RepoContext, STATE_DIR_NAME};
use entire_core::session_id::agent_session_id;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid session state {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    #[serde(rename = "ACTIVE")]
    Active,
    /// Active, with at least one checkpoint published to the metadata branch.
    #[serde(rename = "ACTIVE_COMMITTED")]
    ActiveCommitted,
    #[serde(rename = "ENDED")]
    Ended,
    #[serde(rename = "ORPHANED")]
    Orphaned,
}

impl Phase {
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Active | Phase::ActiveCommitted)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Active => "ACTIVE",
            Phase::ActiveCommitted => "ACTIVE_COMMITTED",
            Phase::Ended => "ENDED",
            Phase::Orphaned => "ORPHANED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default)]
    pub agent_type: String,
    #[serde(default)]
    pub strategy: String,
    /// Full 40-char hex of HEAD at session start. Shadow branch names carry
    /// only the first 7 chars, so comparisons against them are prefix
    /// matches, never equality.
    pub base_commit: String,
    #[serde(default)]
    pub shadow_branch: String,
    #[serde(default)]
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub last_interaction_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checkpoint_count: u32,
    #[serde(default)]
    pub step_count: u32,
    /// Once the concurrent-session warning has been shown, every further
    /// hook event in this session is a silent passthrough.
    #[serde(default)]
    pub concurrent_warning_shown: bool,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub tool_use_id: String,
}

impl SessionState {
    /// Sub-agent sessions (spawned with a parent) are tracked but excluded
    /// from the concurrent-session gate.
    pub fn is_sub_session(&self) -> bool {
        !self.parent_id.is_empty()
    }

    pub fn base_short(&self) -> &str {
        &self.base_commit[..7.min(self.base_commit.len())]
    }
}

/// Store for session state files.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(ctx: &RepoContext) -> Self {
        Self {
            dir: ctx.git_dir.join(STATE_DIR_NAME),
        }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn state_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", agent_session_id(session_id)))
    }

    /// Atomically persist `state`: write `<id>.json.tmp` (0600), fsync,
    /// rename over the final path. Last writer wins per session id.
    pub fn save(&self, state: &SessionState) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir)?;
        let final_path = self.state_path(&state.session_id);
        let tmp_path = final_path.with_extension("json.tmp");

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(&serde_json::to_vec_pretty(state).map_err(|source| {
            StateError::Json {
                path: tmp_path.display().to_string(),
                source,
            }
        })?)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Load a session's state; `None` when no state exists. Only genuine
    /// I/O or parse failures are errors.
    pub fn load(&self, session_id: &str) -> Result<Option<SessionState>, StateError> {
        let path = self.state_path(session_id);
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|source| StateError::Json {
                    path: path.display().to_string(),
                    source,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All session states. A missing directory is an empty list.
    pub fn list(&self) -> Result<Vec<SessionState>, StateError> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut states = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<SessionState>(&text) {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable session state: {e}");
                }
            }
        }
        Ok(states)
    }

    pub fn remove(&self, session_id: &str) -> Result<(), StateError> {
        match std::fs::remove_file(self.state_path(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the whole state directory. A missing directory is a no-op.
    pub fn remove_all(&self) -> Result<(), StateError> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
