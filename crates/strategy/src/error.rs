use entire_git_native::StorageError;

use crate::state::StateError;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("not a git repository")]
    NotARepo,

    #[error("strategy {0} does not support this operation")]
    StrategyMismatch(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<entire_core::paths::PathError> for StrategyError {
    fn from(e: entire_core::paths::PathError) -> Self {
        match e {
            entire_core::paths::PathError::NotARepo => StrategyError::NotARepo,
            entire_core::paths::PathError::Io(io) => StrategyError::Io(io),
        }
    }
}
