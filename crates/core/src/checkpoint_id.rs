use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a checkpoint id in hex characters.
pub const CHECKPOINT_ID_LEN: usize = 12;

/// A content-addressed checkpoint identifier: 12 lowercase hex characters.
///
/// Derived from the snapshot tree hash salted with the session id, so two
/// sessions producing identical trees get distinct ids while a single
/// session re-snapshotting an unchanged tree reuses the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckpointId(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid checkpoint id: {0:?} (want {CHECKPOINT_ID_LEN} lowercase hex chars)")]
pub struct InvalidCheckpointId(pub String);

impl CheckpointId {
    pub fn new(id: &str) -> Result<Self, InvalidCheckpointId> {
        let valid = id.len() == CHECKPOINT_ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(id.to_string()))
        } else {
            Err(InvalidCheckpointId(id.to_string()))
        }
    }

    /// Derive the checkpoint id for a snapshot tree written by a session.
    ///
    /// First [`CHECKPOINT_ID_LEN`] hex chars of `SHA-256(tree_hash ‖ session_id)`.
    /// The tree hash alone would collide across sessions that produce the
    /// same tree; the session salt keeps their metadata entries distinct.
    pub fn derive(tree_hash: &str, session_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tree_hash.as_bytes());
        hasher.update(session_id.as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(CHECKPOINT_ID_LEN);
        for byte in digest.iter().take(CHECKPOINT_ID_LEN / 2) {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sharded directory prefix for this id on the metadata branch,
    /// including the trailing slash: `ab/cdef0123456789` → `"ab/cdef0123456789/"`.
    pub fn shard_path(&self) -> String {
        format!("{}/{}/", &self.0[..2], &self.0[2..])
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CheckpointId {
    type Error = InvalidCheckpointId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<CheckpointId> for String {
    fn from(id: CheckpointId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_path_splits_after_two_chars() {
        let id = CheckpointId::new("cafebabecafe").unwrap();
        assert_eq!(id.shard_path(), "ca/febabecafe/");
    }

    #[test]
    fn rejects_wrong_length_and_non_hex() {
        assert!(CheckpointId::new("abc").is_err());
        assert!(CheckpointId::new("cafebabecafe0").is_err());
        assert!(CheckpointId::new("CAFEBABECAFE").is_err());
        assert!(CheckpointId::new("ghijklmnopqr").is_err());
    }

    #[test]
    fn derive_is_deterministic() {
        let a = CheckpointId::derive("4b825dc642cb6eb9a060e54bf8d69288fbee4904", "session-1");
        let b = CheckpointId::derive("4b825dc642cb6eb9a060e54bf8d69288fbee4904", "session-1");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), CHECKPOINT_ID_LEN);
    }

    #[test]
    fn derive_differs_across_sessions_over_same_tree() {
        let tree = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
        let a = CheckpointId::derive(tree, "session-1");
        let b = CheckpointId::derive(tree, "session-2");
        assert_ne!(a, b);
    }

    #[test]
    fn serde_round_trip() {
        let id = CheckpointId::new("a1b2c3d4e5f6").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"a1b2c3d4e5f6\"");
        let back: CheckpointId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
