use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use gix::object::tree::EntryKind;
use gix::{ObjectId, Repository};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use entire_core::checkpoint_id::CheckpointId;
use entire_core::paths::{self, METADATA_REF};
use entire_core::session_id::agent_session_id;
use entire_core::trailers;

use crate::error::{Result, StorageError};
use crate::ops::{self, TreeEntry};

/// Transcripts above this size are split into chunks at line boundaries:
/// `full.jsonl`, `full.jsonl.001`, `full.jsonl.002`, … The three-digit
/// suffix keeps chunk names lexicographically ordered for reassembly.
pub const TRANSCRIPT_CHUNK_BYTES: usize = 10 * 1024 * 1024;

static SHARDED_METADATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{2}/[0-9a-f]{10}/metadata\.json$").unwrap());

static CHUNK_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^full\.jsonl(\.\d{3})?$").unwrap());

/// Git-native checkpoint storage.
///
/// Working-tree snapshots go onto per-base-commit shadow branches (or the
/// active branch for the auto-commit strategy); per-checkpoint metadata goes
/// onto the fixed `entire/sessions` branch under sharded paths. Both are
/// ordinary commits, so nothing here touches the user's index or worktree.
pub struct CheckpointStore {
    repo_root: PathBuf,
    worktree_id: String,
}

#[derive(Debug, Clone)]
pub struct WriteTemporaryOptions<'a> {
    pub session_id: &'a str,
    /// Full 40-char hex of the commit the session started from.
    pub base_commit: &'a str,
    /// Repo-relative paths the agent touched; unioned with files tracked in
    /// the base commit. Untracked files outside this set are not snapshotted.
    pub modified_files: &'a [String],
    /// Scratch directory holding `full.jsonl`, `prompt.txt`, `context.md`.
    pub metadata_dir: Option<&'a Path>,
    pub commit_message: &'a str,
    pub author_name: &'a str,
    pub author_email: &'a str,
    /// Human-readable agent type for the commit trailer.
    pub agent_type: &'a str,
}

#[derive(Debug, Clone)]
pub struct WriteResult {
    pub commit_hash: String,
    pub tree_hash: String,
    pub checkpoint_id: CheckpointId,
    /// Short name of the ref the snapshot landed on.
    pub branch: String,
    /// True when the tree was identical to the previous checkpoint and no
    /// commit was written; `commit_hash` is then the previous tip.
    pub skipped: bool,
}

#[derive(Debug, Clone)]
pub struct WriteCommittedOptions<'a> {
    pub checkpoint_id: CheckpointId,
    pub session_id: &'a str,
    pub strategy: &'a str,
    pub agent_type: &'a str,
    /// Current branch short name; empty in detached HEAD (the metadata field
    /// is then omitted entirely).
    pub branch: &'a str,
    pub transcript: &'a [u8],
    pub prompts: Option<&'a str>,
    pub context: Option<&'a str>,
    /// Stable hash of the snapshot tree this checkpoint describes.
    pub content_hash: Option<&'a str>,
    pub files_touched: &'a [String],
    pub token_usage: Option<TokenUsage>,
    pub author_name: &'a str,
    pub author_email: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_creation: u64,
    #[serde(default)]
    pub cache_read: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_creation + self.cache_read
    }
}

/// `metadata.json` for a committed checkpoint.
///
/// When a second session reuses a checkpoint id (identical tree), the prior
/// files are archived under `1/`, `2/`, … and this document is merged:
/// `session_count` grows, `agents` accumulates in first-seen order, and
/// `agent` stays `agents[0]` for readers of the original single-agent field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedMetadata {
    pub checkpoint_id: String,
    pub session_id: String,
    pub strategy: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub session_count: u32,
    #[serde(default)]
    pub files_touched: Vec<String>,
    pub token_usage: Option<TokenUsage>,
}

#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub checkpoint_id: CheckpointId,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
    pub agent: String,
    pub branch: String,
}

#[derive(Debug, Clone)]
pub struct ReadCommittedResult {
    pub metadata: CommittedMetadata,
    pub prompts: String,
    /// Transcript bytes with chunks reassembled in order.
    pub transcript: Vec<u8>,
}

impl CheckpointStore {
    pub fn new(repo_root: impl Into<PathBuf>, worktree_id: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            worktree_id: worktree_id.into(),
        }
    }

    pub fn from_context(ctx: &paths::RepoContext) -> Self {
        Self::new(ctx.root.clone(), ctx.worktree_id.clone())
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Snapshot the working tree onto the session's shadow branch.
    ///
    /// The shadow branch is created on the first checkpoint for a base
    /// commit and parented on that base; later checkpoints chain onto the
    /// previous tip. A snapshot whose tree equals the previous one is
    /// skipped and the previous commit hash returned.
    pub fn write_temporary(&self, opts: &WriteTemporaryOptions) -> Result<WriteResult> {
        let shadow_branch = paths::shadow_branch_name(opts.base_commit, &self.worktree_id);
        self.write_snapshot(&shadow_branch, opts)
    }

    /// Snapshot the working tree as a commit on an existing branch (the
    /// auto-commit strategy's active branch). Dedup rules match
    /// [`Self::write_temporary`].
    pub fn write_to_branch(&self, branch: &str, opts: &WriteTemporaryOptions) -> Result<WriteResult> {
        self.write_snapshot(branch, opts)
    }

    fn write_snapshot(&self, branch: &str, opts: &WriteTemporaryOptions) -> Result<WriteResult> {
        let repo = ops::open_repo(&self.repo_root)?;
        let base = ops::resolve_commit(&repo, opts.base_commit)?;
        let entries = self.snapshot_entries(&repo, base, opts)?;
        let tree_id = ops::build_tree(&repo, &entries)?;
        let checkpoint_id = CheckpointId::derive(&tree_id.to_string(), opts.session_id);
        let ref_name = format!("refs/heads/{branch}");

        let scratch_path = format!(
            "{}/{}",
            paths::METADATA_SCRATCH_DIR,
            agent_session_id(opts.session_id)
        );
        let message = trailers::append_trailers(
            opts.commit_message,
            &[
                (trailers::CHECKPOINT_TRAILER, checkpoint_id.as_str()),
                (trailers::SESSION_TRAILER, opts.session_id),
                (trailers::METADATA_TRAILER, &scratch_path),
                (trailers::AGENT_TRAILER, opts.agent_type),
            ],
        );

        let mut attempt = 0;
        loop {
            let tip = ops::find_ref_tip(&repo, &ref_name)?;
            let parent = tip.unwrap_or(base);
            let parent_tree = ops::commit_tree_id(&repo, parent)?;
            if parent_tree == tree_id {
                debug!(branch, checkpoint = %checkpoint_id, "tree unchanged, skipping checkpoint");
                return Ok(WriteResult {
                    commit_hash: parent.to_string(),
                    tree_hash: tree_id.to_string(),
                    checkpoint_id,
                    branch: branch.to_string(),
                    skipped: true,
                });
            }

            let commit = ops::write_commit(
                &repo,
                tree_id,
                &[parent],
                opts.author_name,
                opts.author_email,
                &message,
            )?;

            match ops::set_ref(&repo, &ref_name, tip, commit, opts.commit_message) {
                Ok(()) => {
                    info!(branch, commit = %commit, checkpoint = %checkpoint_id, "wrote checkpoint snapshot");
                    return Ok(WriteResult {
                        commit_hash: commit.to_string(),
                        tree_hash: tree_id.to_string(),
                        checkpoint_id,
                        branch: branch.to_string(),
                        skipped: false,
                    });
                }
                Err(e) if attempt < ops::MAX_REF_RETRIES => {
                    attempt += 1;
                    warn!(branch, attempt, "ref advance lost a race, retrying: {e}");
                    std::thread::sleep(ops::retry_delay(attempt));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Publish a checkpoint's metadata to the `entire/sessions` branch.
    ///
    /// Appends one commit; objects are written before the single ref update,
    /// so a failure leaves the branch unchanged. If the checkpoint id was
    /// written before (another session over the same tree), the existing
    /// file family is archived under a numeric subdirectory first.
    pub fn write_committed(&self, opts: &WriteCommittedOptions) -> Result<()> {
        let repo = ops::open_repo(&self.repo_root)?;
        let shard = opts.checkpoint_id.shard_path();

        let mut attempt = 0;
        loop {
            let tip = ops::find_ref_tip(&repo, METADATA_REF)?;
            let mut entries = match tip {
                Some(t) => ops::flatten_tree(&repo, ops::commit_tree_id(&repo, t)?)?,
                None => BTreeMap::new(),
            };

            let metadata_key = format!("{shard}{}", paths::METADATA_FILE);
            let existing = match entries.get(&metadata_key) {
                Some(entry) => Some(serde_json::from_slice::<CommittedMetadata>(
                    &ops::read_blob(&repo, entry.oid)?,
                )?),
                None => None,
            };

            if let Some(existing_meta) = &existing {
                debug!(
                    checkpoint = %opts.checkpoint_id,
                    sessions = existing_meta.session_count,
                    "checkpoint id already published, archiving previous session"
                );
                archive_existing_session(&shard, existing_meta.session_count, &mut entries);
            }

            for (i, chunk) in chunk_transcript(opts.transcript, TRANSCRIPT_CHUNK_BYTES)
                .iter()
                .enumerate()
            {
                let oid = ops::write_blob(&repo, chunk)?;
                let key = if i == 0 {
                    format!("{shard}{}", paths::TRANSCRIPT_FILE)
                } else {
                    format!("{shard}{}.{i:03}", paths::TRANSCRIPT_FILE)
                };
                entries.insert(key, TreeEntry { oid, kind: EntryKind::Blob });
            }

            let metadata = merge_metadata(opts, existing.as_ref());
            let metadata_oid = ops::write_blob(&repo, &serde_json::to_vec_pretty(&metadata)?)?;
            entries.insert(
                metadata_key,
                TreeEntry {
                    oid: metadata_oid,
                    kind: EntryKind::Blob,
                },
            );

            let optional_files = [
                (paths::PROMPT_FILE, opts.prompts),
                (paths::CONTEXT_FILE, opts.context),
                (paths::CONTENT_HASH_FILE, opts.content_hash),
            ];
            for (name, content) in optional_files {
                if let Some(content) = content {
                    let oid = ops::write_blob(&repo, content.as_bytes())?;
                    entries.insert(
                        format!("{shard}{name}"),
                        TreeEntry {
                            oid,
                            kind: EntryKind::Blob,
                        },
                    );
                }
            }

            let tree_id = ops::build_tree(&repo, &entries)?;
            let message = trailers::append_trailers(
                &format!("checkpoint: {}", opts.checkpoint_id),
                &[
                    (trailers::CHECKPOINT_TRAILER, opts.checkpoint_id.as_str()),
                    (trailers::SESSION_TRAILER, opts.session_id),
                    (trailers::AGENT_TRAILER, opts.agent_type),
                ],
            );
            let parents: Vec<ObjectId> = tip.into_iter().collect();
            let commit = ops::write_commit(
                &repo,
                tree_id,
                &parents,
                opts.author_name,
                opts.author_email,
                &message,
            )?;

            match ops::set_ref(&repo, METADATA_REF, tip, commit, "checkpoint metadata") {
                Ok(()) => {
                    info!(
                        checkpoint = %opts.checkpoint_id,
                        session = opts.session_id,
                        commit = %commit,
                        "published checkpoint metadata"
                    );
                    return Ok(());
                }
                Err(e) if attempt < ops::MAX_REF_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "metadata branch advance lost a race, retrying: {e}");
                    std::thread::sleep(ops::retry_delay(attempt));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// All committed checkpoints on the metadata branch, newest first.
    pub fn list_committed(&self) -> Result<Vec<CheckpointInfo>> {
        let repo = ops::open_repo(&self.repo_root)?;
        let Some(tip) = ops::find_ref_tip(&repo, METADATA_REF)? else {
            return Ok(Vec::new());
        };
        let entries = ops::flatten_tree(&repo, ops::commit_tree_id(&repo, tip)?)?;

        let mut checkpoints = Vec::new();
        for (path, entry) in &entries {
            if !SHARDED_METADATA_RE.is_match(path) {
                continue;
            }
            // The id is a pure function of the sharded path.
            let id_hex = format!("{}{}", &path[..2], &path[3..13]);
            let Ok(checkpoint_id) = CheckpointId::new(&id_hex) else {
                continue;
            };
            let metadata: CommittedMetadata =
                match serde_json::from_slice(&ops::read_blob(&repo, entry.oid)?) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path, "skipping unparsable checkpoint metadata: {e}");
                        continue;
                    }
                };
            checkpoints.push(CheckpointInfo {
                checkpoint_id,
                created_at: metadata.created_at,
                session_id: metadata.session_id,
                agent: metadata.agent,
                branch: metadata.branch,
            });
        }
        checkpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(checkpoints)
    }

    /// Load a committed checkpoint by unique id prefix.
    pub fn read_committed(&self, prefix: &str) -> Result<ReadCommittedResult> {
        let all = self.list_committed()?;
        let matches: Vec<&CheckpointInfo> = all
            .iter()
            .filter(|c| c.checkpoint_id.as_str().starts_with(prefix))
            .collect();
        let info = match matches.len() {
            0 => return Err(StorageError::NotFound(prefix.to_string())),
            1 => matches[0],
            _ => {
                return Err(StorageError::AmbiguousId {
                    prefix: prefix.to_string(),
                    candidates: matches
                        .iter()
                        .map(|c| c.checkpoint_id.to_string())
                        .collect(),
                })
            }
        };

        let repo = ops::open_repo(&self.repo_root)?;
        let tip = ops::find_ref_tip(&repo, METADATA_REF)?
            .ok_or_else(|| StorageError::NotFound(prefix.to_string()))?;
        let entries = ops::flatten_tree(&repo, ops::commit_tree_id(&repo, tip)?)?;
        let shard = info.checkpoint_id.shard_path();

        let metadata_key = format!("{shard}{}", paths::METADATA_FILE);
        let metadata_entry = entries
            .get(&metadata_key)
            .ok_or_else(|| StorageError::NotFound(prefix.to_string()))?;
        let metadata: CommittedMetadata =
            serde_json::from_slice(&ops::read_blob(&repo, metadata_entry.oid)?)?;

        let prompts = match entries.get(&format!("{shard}{}", paths::PROMPT_FILE)) {
            Some(entry) => String::from_utf8_lossy(&ops::read_blob(&repo, entry.oid)?).into_owned(),
            None => String::new(),
        };

        // Chunk names sort lexicographically: full.jsonl, full.jsonl.001, …
        let mut transcript = Vec::new();
        for (path, entry) in &entries {
            let Some(name) = path.strip_prefix(shard.as_str()) else {
                continue;
            };
            if name.contains('/') || !CHUNK_FILE_RE.is_match(name) {
                continue;
            }
            transcript.extend_from_slice(&ops::read_blob(&repo, entry.oid)?);
        }

        Ok(ReadCommittedResult {
            metadata,
            prompts,
            transcript,
        })
    }

    /// Build the flattened snapshot: files tracked in the base commit plus
    /// the modified set, all read from the working tree, plus the metadata
    /// scratch directory under `.entire/metadata/<session-id>/`.
    fn snapshot_entries(
        &self,
        repo: &Repository,
        base: ObjectId,
        opts: &WriteTemporaryOptions,
    ) -> Result<BTreeMap<String, TreeEntry>> {
        let base_tree = ops::commit_tree_id(repo, base)?;
        let tracked = ops::flatten_tree(repo, base_tree)?;

        let mut wanted: BTreeSet<String> = tracked.keys().cloned().collect();
        wanted.extend(opts.modified_files.iter().cloned());

        let mut entries = BTreeMap::new();
        for path in wanted {
            // The scratch dir is snapshotted separately below.
            if path.starts_with(".entire/") {
                continue;
            }
            let abs = self.repo_root.join(&path);
            let Ok(file_meta) = std::fs::symlink_metadata(&abs) else {
                continue; // deleted since the base commit
            };
            if !file_meta.is_file() {
                continue;
            }
            let data = std::fs::read(&abs)?;
            let oid = ops::write_blob(repo, &data)?;
            entries.insert(
                path,
                TreeEntry {
                    oid,
                    kind: blob_kind(&file_meta),
                },
            );
        }

        if let Some(dir) = opts.metadata_dir {
            let prefix = format!(
                "{}/{}/",
                paths::METADATA_SCRATCH_DIR,
                agent_session_id(opts.session_id)
            );
            copy_metadata_dir(repo, dir, &prefix, &mut entries)?;
        }

        Ok(entries)
    }
}

/// Move every base-level file of a checkpoint (metadata, prompt, context,
/// content hash, and the whole transcript chunk family) under
/// `<session_count>/`, clearing the base path for the new session's files.
fn archive_existing_session(
    shard: &str,
    session_count: u32,
    entries: &mut BTreeMap<String, TreeEntry>,
) {
    let archive_prefix = format!("{shard}{session_count}/");
    let to_move: Vec<String> = entries
        .keys()
        .filter(|key| {
            key.starts_with(shard) && !key[shard.len()..].contains('/')
        })
        .cloned()
        .collect();
    for key in to_move {
        if let Some(entry) = entries.remove(&key) {
            let name = &key[shard.len()..];
            entries.insert(format!("{archive_prefix}{name}"), entry);
        }
    }
}

fn merge_metadata(
    opts: &WriteCommittedOptions,
    existing: Option<&CommittedMetadata>,
) -> CommittedMetadata {
    match existing {
        None => CommittedMetadata {
            checkpoint_id: opts.checkpoint_id.to_string(),
            session_id: opts.session_id.to_string(),
            strategy: opts.strategy.to_string(),
            agent: opts.agent_type.to_string(),
            // Single-session checkpoints keep the array omitted.
            agents: Vec::new(),
            branch: opts.branch.to_string(),
            created_at: Utc::now(),
            session_count: 1,
            files_touched: opts.files_touched.to_vec(),
            token_usage: opts.token_usage.clone(),
        },
        Some(prev) => {
            let mut agents = if prev.agents.is_empty() {
                vec![prev.agent.clone()]
            } else {
                prev.agents.clone()
            };
            if !agents.iter().any(|a| a == opts.agent_type) {
                agents.push(opts.agent_type.to_string());
            }
            CommittedMetadata {
                checkpoint_id: opts.checkpoint_id.to_string(),
                session_id: opts.session_id.to_string(),
                strategy: opts.strategy.to_string(),
                agent: agents[0].clone(),
                agents,
                branch: opts.branch.to_string(),
                created_at: Utc::now(),
                session_count: prev.session_count + 1,
                files_touched: opts.files_touched.to_vec(),
                token_usage: opts.token_usage.clone(),
            }
        }
    }
}

/// Split a transcript into chunks of at most `max` bytes, breaking at line
/// boundaries. A single line longer than `max` is split mid-line rather
/// than producing an oversized chunk.
fn chunk_transcript(bytes: &[u8], max: usize) -> Vec<&[u8]> {
    if bytes.len() <= max {
        return vec![bytes];
    }
    let mut chunks = Vec::new();
    let mut rest = bytes;
    while rest.len() > max {
        let window = &rest[..max];
        let split = match window.iter().rposition(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None => max,
        };
        chunks.push(&rest[..split]);
        rest = &rest[split..];
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

#[cfg(unix)]
fn blob_kind(meta: &std::fs::Metadata) -> EntryKind {
    use std::os::unix::fs::PermissionsExt;
    if meta.permissions().mode() & 0o111 != 0 {
        EntryKind::BlobExecutable
    } else {
        EntryKind::Blob
    }
}

#[cfg(not(unix))]
fn blob_kind(_meta: &std::fs::Metadata) -> EntryKind {
    EntryKind::Blob
}

/// Copy the hook's scratch metadata directory into the snapshot under
/// `prefix`. Symbolic links are skipped: they could point at files outside
/// the metadata directory.
fn copy_metadata_dir(
    repo: &Repository,
    dir: &Path,
    prefix: &str,
    entries: &mut BTreeMap<String, TreeEntry>,
) -> Result<()> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in read_dir {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if file_type.is_symlink() {
            debug!(path = %entry.path().display(), "skipping symlink in metadata dir");
            continue;
        }
        if file_type.is_dir() {
            copy_metadata_dir(repo, &entry.path(), &format!("{prefix}{name}/"), entries)?;
            continue;
        }
        let data = std::fs::read(entry.path())?;
        let oid = ops::write_blob(repo, &data)?;
        entries.insert(
            format!("{prefix}{name}"),
            TreeEntry {
                oid,
                kind: EntryKind::Blob,
            },
        );
    }
    Ok(())
}
