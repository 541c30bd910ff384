use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not a git repository: {0}")]
    NotARepo(PathBuf),

    #[error("invalid base commit: {0}")]
    InvalidBase(String),

    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("ambiguous checkpoint id {prefix}: matches {}", candidates.join(", "))]
    AmbiguousId {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("git error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
