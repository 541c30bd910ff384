use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use gix::object::tree::EntryKind;
use gix::refs::transaction::{Change, LogChange, PreviousValue, RefEdit, RefLog};
use gix::{ObjectId, Repository};
use rand::Rng;

use crate::error::{Result, StorageError};

/// Ref updates race against concurrent hook invocations; advances are
/// retried this many times on a lost compare-and-swap.
pub const MAX_REF_RETRIES: u32 = 5;

/// Wrap any gix-compatible error into [`StorageError::Backend`].
pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> StorageError {
    StorageError::Backend(Box::new(e))
}

/// Open a git repository at `repo_path`.
///
/// Returns [`StorageError::NotARepo`] when `.git` is absent.
pub fn open_repo(repo_path: &Path) -> Result<Repository> {
    let repo = gix::open(repo_path).map_err(|e| {
        if repo_path.join(".git").exists() {
            backend(e)
        } else {
            StorageError::NotARepo(repo_path.to_path_buf())
        }
    })?;
    Ok(repo)
}

/// Find the tip commit of a ref, `None` if the ref doesn't exist.
pub fn find_ref_tip(repo: &Repository, ref_name: &str) -> Result<Option<ObjectId>> {
    match repo.try_find_reference(ref_name).map_err(backend)? {
        Some(reference) => {
            let id = reference.into_fully_peeled_id().map_err(backend)?;
            Ok(Some(id.detach()))
        }
        None => Ok(None),
    }
}

/// Parse a 40-char hex commit hash and confirm it names a commit in the
/// object store.
pub fn resolve_commit(repo: &Repository, hex: &str) -> Result<ObjectId> {
    let id = ObjectId::from_hex(hex.as_bytes())
        .map_err(|_| StorageError::InvalidBase(hex.to_string()))?;
    repo.find_object(id)
        .map_err(|_| StorageError::InvalidBase(hex.to_string()))?
        .try_into_commit()
        .map_err(|_| StorageError::InvalidBase(hex.to_string()))?;
    Ok(id)
}

/// Get the tree [`ObjectId`] from a commit.
pub fn commit_tree_id(repo: &Repository, commit_id: ObjectId) -> Result<ObjectId> {
    let commit = repo
        .find_object(commit_id)
        .map_err(backend)?
        .try_into_commit()
        .map_err(backend)?;
    let tree_id = commit.tree_id().map_err(backend)?;
    Ok(tree_id.detach())
}

/// Full message of a commit, lossily decoded.
pub fn commit_message(repo: &Repository, commit_id: ObjectId) -> Result<String> {
    let commit = repo
        .find_object(commit_id)
        .map_err(backend)?
        .try_into_commit()
        .map_err(backend)?;
    Ok(commit.message_raw_sloppy().to_string())
}

/// Commit timestamp as seconds since the epoch.
pub fn commit_seconds(repo: &Repository, commit_id: ObjectId) -> Result<i64> {
    let commit = repo
        .find_object(commit_id)
        .map_err(backend)?
        .try_into_commit()
        .map_err(backend)?;
    Ok(commit.time().map_err(backend)?.seconds)
}

/// First parent of a commit, `None` for root commits.
pub fn first_parent(repo: &Repository, commit_id: ObjectId) -> Result<Option<ObjectId>> {
    let commit = repo
        .find_object(commit_id)
        .map_err(backend)?
        .try_into_commit()
        .map_err(backend)?;
    let parent = commit.parent_ids().next().map(|id| id.detach());
    Ok(parent)
}

pub fn write_blob(repo: &Repository, data: &[u8]) -> Result<ObjectId> {
    Ok(repo.write_blob(data).map_err(backend)?.detach())
}

pub fn read_blob(repo: &Repository, oid: ObjectId) -> Result<Vec<u8>> {
    Ok(repo.find_object(oid).map_err(backend)?.detach().data)
}

pub fn signature(name: &str, email: &str) -> gix::actor::Signature {
    gix::actor::Signature {
        name: name.into(),
        email: email.into(),
        time: gix::date::Time::now_local_or_utc(),
    }
}

/// Write a commit object (no ref update).
pub fn write_commit(
    repo: &Repository,
    tree_id: ObjectId,
    parents: &[ObjectId],
    author_name: &str,
    author_email: &str,
    message: &str,
) -> Result<ObjectId> {
    let sig = signature(author_name, author_email);
    let commit = gix::objs::Commit {
        message: message.into(),
        tree: tree_id,
        author: sig.clone(),
        committer: sig,
        encoding: None,
        parents: parents.to_vec().into(),
        extra_headers: Default::default(),
    };
    Ok(repo.write_object(&commit).map_err(backend)?.detach())
}

/// Atomically point `ref_name` at `new`, requiring the current value to be
/// `expected` (`None` = the ref must not exist yet).
pub fn set_ref(
    repo: &Repository,
    ref_name: &str,
    expected: Option<ObjectId>,
    new: ObjectId,
    log_message: &str,
) -> Result<()> {
    let expected = match expected {
        Some(tip) => PreviousValue::ExistingMustMatch(gix::refs::Target::Object(tip)),
        None => PreviousValue::MustNotExist,
    };

    repo.edit_references([RefEdit {
        change: Change::Update {
            log: LogChange {
                mode: RefLog::AndReference,
                force_create_reflog: false,
                message: log_message.into(),
            },
            expected,
            new: gix::refs::Target::Object(new),
        },
        name: ref_name
            .try_into()
            .map_err(|e: gix::validate::reference::name::Error| backend(e))?,
        deref: false,
    }])
    .map_err(backend)?;

    Ok(())
}

/// Delete a ref, requiring it currently points to `expected_tip`.
pub fn delete_ref(repo: &Repository, ref_name: &str, expected_tip: ObjectId) -> Result<()> {
    repo.edit_references([RefEdit {
        change: Change::Delete {
            expected: PreviousValue::ExistingMustMatch(gix::refs::Target::Object(expected_tip)),
            log: RefLog::AndReference,
        },
        name: ref_name
            .try_into()
            .map_err(|e: gix::validate::reference::name::Error| backend(e))?,
        deref: false,
    }])
    .map_err(backend)?;
    Ok(())
}

/// Small randomized pause between CAS attempts so competing hook processes
/// don't retry in lockstep.
pub fn retry_delay(attempt: u32) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(10..50);
    Duration::from_millis(u64::from(attempt + 1) * jitter_ms)
}

/// A flattened tree entry: blob (or symlink) object plus its entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEntry {
    pub oid: ObjectId,
    pub kind: EntryKind,
}

/// Flatten a tree into `path -> entry`, recursing through subtrees. Paths
/// use `/` separators regardless of platform.
pub fn flatten_tree(repo: &Repository, tree_id: ObjectId) -> Result<BTreeMap<String, TreeEntry>> {
    let tree = repo.find_tree(tree_id).map_err(backend)?;
    let mut recorder = gix::traverse::tree::Recorder::default();
    tree.traverse()
        .breadthfirst(&mut recorder)
        .map_err(backend)?;

    let mut entries = BTreeMap::new();
    for record in recorder.records {
        if record.mode.is_tree() {
            continue;
        }
        entries.insert(
            record.filepath.to_string(),
            TreeEntry {
                oid: record.oid,
                kind: record.mode.kind(),
            },
        );
    }
    Ok(entries)
}

/// Build a (possibly nested) tree from flattened `path -> entry` pairs.
pub fn build_tree(repo: &Repository, entries: &BTreeMap<String, TreeEntry>) -> Result<ObjectId> {
    let empty = ObjectId::empty_tree(repo.object_hash());
    let mut editor = repo.edit_tree(empty).map_err(backend)?;
    for (path, entry) in entries {
        editor
            .upsert(path.as_str(), entry.kind, entry.oid)
            .map_err(backend)?;
    }
    Ok(editor.write().map_err(backend)?.detach())
}

/// List local branches under `prefix` (short names), e.g. `entire/`.
///
/// Goes through `git for-each-ref` with inherited git environment stripped,
/// so results reflect the repository at `repo_path` and nothing else.
pub fn list_branches(repo_path: &Path, prefix: &str) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args([
            "for-each-ref",
            "--format=%(refname:short)",
            &format!("refs/heads/{prefix}"),
        ])
        .current_dir(repo_path)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .env_remove("GIT_COMMON_DIR")
        .env_remove("GIT_INDEX_FILE")
        .env_remove("GIT_OBJECT_DIRECTORY")
        .env_remove("GIT_ALTERNATE_OBJECT_DIRECTORIES")
        .output()
        .map_err(StorageError::Io)?;
    if !output.status.success() {
        return Err(StorageError::Backend(
            String::from_utf8_lossy(&output.stderr).trim().to_string().into(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_repo;

    #[test]
    fn open_repo_not_a_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let err = open_repo(tmp.path()).unwrap_err();
        assert!(matches!(err, StorageError::NotARepo(_)), "got: {err}");
    }

    #[test]
    fn find_ref_tip_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());

        let repo = open_repo(tmp.path()).unwrap();
        let tip = find_ref_tip(&repo, "refs/heads/nonexistent").unwrap();
        assert!(tip.is_none());
    }

    #[test]
    fn commit_chain_and_ref_cas() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let repo = open_repo(tmp.path()).unwrap();
        let empty = ObjectId::empty_tree(repo.object_hash());

        let first = write_commit(&repo, empty, &[], "t", "t@t", "first").unwrap();
        set_ref(&repo, "refs/heads/chain", None, first, "create").unwrap();

        let second = write_commit(&repo, empty, &[first], "t", "t@t", "second").unwrap();
        set_ref(&repo, "refs/heads/chain", Some(first), second, "advance").unwrap();

        let tip = find_ref_tip(&repo, "refs/heads/chain").unwrap().unwrap();
        assert_eq!(tip, second);
        assert_eq!(first_parent(&repo, second).unwrap(), Some(first));

        // Stale expectation must fail, leaving the ref untouched.
        let third = write_commit(&repo, empty, &[first], "t", "t@t", "stale").unwrap();
        assert!(set_ref(&repo, "refs/heads/chain", Some(first), third, "stale").is_err());
        let tip = find_ref_tip(&repo, "refs/heads/chain").unwrap().unwrap();
        assert_eq!(tip, second);
    }

    #[test]
    fn delete_ref_requires_matching_tip() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let repo = open_repo(tmp.path()).unwrap();
        let empty = ObjectId::empty_tree(repo.object_hash());

        let commit = write_commit(&repo, empty, &[], "t", "t@t", "doomed").unwrap();
        set_ref(&repo, "refs/heads/doomed", None, commit, "create").unwrap();
        delete_ref(&repo, "refs/heads/doomed", commit).unwrap();
        assert!(find_ref_tip(&repo, "refs/heads/doomed").unwrap().is_none());
    }

    #[test]
    fn tree_build_flatten_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let repo = open_repo(tmp.path()).unwrap();

        let blob_a = write_blob(&repo, b"alpha").unwrap();
        let blob_b = write_blob(&repo, b"beta").unwrap();
        let mut entries = BTreeMap::new();
        entries.insert(
            "a.txt".to_string(),
            TreeEntry {
                oid: blob_a,
                kind: EntryKind::Blob,
            },
        );
        entries.insert(
            "dir/sub/b.txt".to_string(),
            TreeEntry {
                oid: blob_b,
                kind: EntryKind::Blob,
            },
        );

        let tree_id = build_tree(&repo, &entries).unwrap();
        let flattened = flatten_tree(&repo, tree_id).unwrap();
        assert_eq!(flattened.len(), 2);
        assert_eq!(flattened["a.txt"].oid, blob_a);
        assert_eq!(flattened["dir/sub/b.txt"].oid, blob_b);
        assert_eq!(read_blob(&repo, blob_b).unwrap(), b"beta");
    }

    #[test]
    fn list_branches_filters_by_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let repo = open_repo(tmp.path()).unwrap();
        let empty = ObjectId::empty_tree(repo.object_hash());
        let commit = write_commit(&repo, empty, &[], "t", "t@t", "x").unwrap();
        set_ref(&repo, "refs/heads/entire/abc1234", None, commit, "c").unwrap();
        set_ref(&repo, "refs/heads/entire/sessions", None, commit, "c").unwrap();
        set_ref(&repo, "refs/heads/feature/x", None, commit, "c").unwrap();

        let mut branches = list_branches(tmp.path(), "entire/").unwrap();
        branches.sort();
        assert_eq!(branches, vec!["entire/abc1234", "entire/sessions"]);
    }
}
