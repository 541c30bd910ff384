pub mod error;
pub mod ops;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use error::{Result, StorageError};
pub use store::{
    CheckpointInfo, CheckpointStore, CommittedMetadata, ReadCommittedResult, TokenUsage,
    WriteCommittedOptions, WriteResult, WriteTemporaryOptions,
};
