//! `explain`: human-readable context for sessions, commits and checkpoints.
//!
//! Verbosity for checkpoints: the default is a summary (id, session,
//! timestamp, tokens, intent); `--verbose` adds prompts and files touched;
//! `--full` appends the raw transcript.

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::io::{IsTerminal, Write};
use std::process::{Command, ExitCode, Stdio};

use entire_core::paths::{git_output, RepoContext};
use entire_core::settings::Settings;
use entire_core::trailers;
use entire_git_native::{ops, CheckpointStore, ReadCommittedResult, StorageError};
use entire_strategy::{strategy_for, AssumeYes, RewindPoint, Strategy};

/// Commits beyond this depth are not searched for checkpoint trailers.
const MAX_COMMITS_TO_SEARCH: usize = 500;
const MAX_INTENT_DISPLAY_LEN: usize = 80;
const MAX_MESSAGE_DISPLAY_LEN: usize = 80;
const MAX_PROMPT_DISPLAY_LEN: usize = 60;
const CHECKPOINT_ID_DISPLAY_LEN: usize = 12;
const DEFAULT_CHECKPOINT_LIMIT: usize = 50;

/// Content longer than this goes through the pager when stdout is a
/// terminal.
const PAGER_LINE_THRESHOLD: usize = 40;

pub struct ExplainArgs {
    pub session: Option<String>,
    pub commit: Option<String>,
    pub checkpoint: Option<String>,
    pub no_pager: bool,
    pub verbose: bool,
    pub full: bool,
}

pub fn run_explain(args: &ExplainArgs) -> anyhow::Result<ExitCode> {
    let ctx = RepoContext::discover().context("not a git repository")?;
    let settings = Settings::load(&ctx.root)?;
    if !settings.enabled {
        println!("Entire is disabled in this repository.");
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(prefix) = &args.checkpoint {
        return explain_checkpoint(&ctx, prefix, args);
    }
    if let Some(reference) = &args.commit {
        return explain_commit(&ctx, reference);
    }
    if let Some(prefix) = &args.session {
        return explain_session(&ctx, prefix, args.no_pager);
    }
    explain_branch(&ctx, &settings, args.no_pager)
}

fn explain_checkpoint(
    ctx: &RepoContext,
    prefix: &str,
    args: &ExplainArgs,
) -> anyhow::Result<ExitCode> {
    let store = CheckpointStore::from_context(ctx);
    let result = match store.read_committed(prefix) {
        Ok(result) => result,
        Err(StorageError::NotFound(_)) => {
            eprintln!("checkpoint not found: {prefix}");
            return Ok(ExitCode::from(1));
        }
        Err(StorageError::AmbiguousId { candidates, .. }) => {
            eprintln!(
                "checkpoint id {prefix} is ambiguous: matches {}",
                candidates.join(", ")
            );
            return Ok(ExitCode::from(1));
        }
        Err(e) => return Err(e.into()),
    };

    let commit_subject = find_commit_subject(ctx, &result.metadata.checkpoint_id);
    let output = format_checkpoint_output(&result, &commit_subject, args.verbose, args.full);
    emit(&output, args.no_pager);
    Ok(ExitCode::SUCCESS)
}

/// Search recent history for the commit carrying this checkpoint's trailer
/// and return its subject line. Empty when none is found in range.
fn find_commit_subject(ctx: &RepoContext, checkpoint_id: &str) -> String {
    let Ok(repo) = ops::open_repo(&ctx.root) else {
        return String::new();
    };
    let Ok(Some(tip)) = ops::find_ref_tip(&repo, "HEAD") else {
        return String::new();
    };

    let mut cursor = Some(tip);
    let mut walked = 0usize;
    while let Some(commit_id) = cursor {
        if walked >= MAX_COMMITS_TO_SEARCH {
            break;
        }
        walked += 1;
        let Ok(message) = ops::commit_message(&repo, commit_id) else {
            break;
        };
        if trailers::parse_trailer(&message, trailers::CHECKPOINT_TRAILER).as_deref()
            == Some(checkpoint_id)
        {
            return message.lines().next().unwrap_or_default().trim().to_string();
        }
        cursor = ops::first_parent(&repo, commit_id).ok().flatten();
    }
    String::new()
}

fn format_checkpoint_output(
    result: &ReadCommittedResult,
    commit_subject: &str,
    verbose: bool,
    full: bool,
) -> String {
    let meta = &result.metadata;
    let mut out = String::new();

    let mut short_id = meta.checkpoint_id.clone();
    short_id.truncate(CHECKPOINT_ID_DISPLAY_LEN);
    out.push_str(&format!("Checkpoint: {short_id}\n"));
    out.push_str(&format!("Session: {}\n", meta.session_id));
    out.push_str(&format!(
        "Created: {}\n",
        meta.created_at.format("%Y-%m-%d %H:%M:%S")
    ));
    if let Some(usage) = &meta.token_usage {
        out.push_str(&format!("Tokens: {}\n", usage.total()));
    }
    out.push('\n');

    let intent = result
        .prompts
        .lines()
        .next()
        .filter(|line| !line.is_empty())
        .map(|line| truncate(line, MAX_INTENT_DISPLAY_LEN))
        .unwrap_or_else(|| "(not generated)".to_string());
    out.push_str(&format!("Intent: {intent}\n"));
    out.push_str("Outcome: (not generated)\n");

    if verbose || full {
        if !commit_subject.is_empty() {
            out.push('\n');
            out.push_str(&format!("Commit: {commit_subject}\n"));
        }
        out.push('\n');

        if meta.files_touched.is_empty() {
            out.push_str("Files: (none)\n");
        } else {
            out.push_str(&format!("Files: ({})\n", meta.files_touched.len()));
            for file in &meta.files_touched {
                out.push_str(&format!("  - {file}\n"));
            }
        }
        out.push('\n');

        out.push_str("Prompts:\n");
        if result.prompts.is_empty() {
            out.push_str("  (none)\n");
        } else {
            out.push_str(&result.prompts);
            out.push('\n');
        }
    }

    if full {
        out.push('\n');
        out.push_str("Transcript:\n");
        if result.transcript.is_empty() {
            out.push_str("  (none)\n");
        } else {
            out.push_str(&String::from_utf8_lossy(&result.transcript));
            out.push('\n');
        }
    }

    out
}

fn explain_session(ctx: &RepoContext, prefix: &str, no_pager: bool) -> anyhow::Result<ExitCode> {
    let states = entire_strategy::StateStore::new(ctx);
    let matches: Vec<_> = states
        .list()?
        .into_iter()
        .filter(|s| {
            entire_core::session_id::agent_session_id(&s.session_id).starts_with(
                entire_core::session_id::agent_session_id(prefix),
            )
        })
        .collect();
    let Some(state) = matches.first() else {
        eprintln!("session not found: {prefix}");
        return Ok(ExitCode::from(1));
    };

    let mut out = String::new();
    out.push_str(&format!("Session: {}\n", state.session_id));
    out.push_str(&format!("Agent: {}\n", state.agent_type));
    out.push_str(&format!("Strategy: {}\n", state.strategy));
    out.push_str(&format!("Phase: {}\n", state.phase));
    out.push_str(&format!(
        "Started: {}\n",
        state.started_at.format("%Y-%m-%d %H:%M:%S")
    ));
    if let Some(at) = state.last_interaction_at {
        out.push_str(&format!(
            "Last interaction: {}\n",
            at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    out.push_str(&format!("Base commit: {}\n", state.base_short()));
    if !state.shadow_branch.is_empty() {
        out.push_str(&format!("Shadow branch: {}\n", state.shadow_branch));
    }
    out.push_str(&format!(
        "Source Ref: {}\n",
        entire_core::paths::METADATA_BRANCH
    ));
    out.push_str(&format!("Checkpoints: {}\n", state.checkpoint_count));

    emit(&out, no_pager);
    Ok(ExitCode::SUCCESS)
}

fn explain_commit(ctx: &RepoContext, reference: &str) -> anyhow::Result<ExitCode> {
    let Some(sha) = git_output(
        &ctx.root,
        &["rev-parse", "--verify", &format!("{reference}^{{commit}}")],
    ) else {
        eprintln!("commit not found: {reference}");
        return Ok(ExitCode::from(1));
    };

    let repo = ops::open_repo(&ctx.root)?;
    let commit_id = ops::resolve_commit(&repo, &sha)?;
    let message = ops::commit_message(&repo, commit_id)?;
    let seconds = ops::commit_seconds(&repo, commit_id)?;
    let date = DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or_default();

    let files = git_output(
        &ctx.root,
        &["diff-tree", "--no-commit-id", "--name-only", "-r", &sha],
    )
    .map(|out| out.lines().map(str::to_string).collect::<Vec<_>>())
    .unwrap_or_default();

    let metadata_dir = trailers::parse_trailer(&message, trailers::METADATA_TRAILER);
    let session_id = trailers::parse_trailer(&message, trailers::SESSION_TRAILER);
    let has_recorder_data = metadata_dir.is_some() || session_id.is_some();

    let mut out = String::new();
    out.push_str(&format!("Commit: {sha} ({})\n", &sha[..7]));
    out.push_str(&format!("Date: {}\n", date.format("%Y-%m-%d %H:%M:%S")));
    if let Some(session_id) = &session_id {
        out.push_str(&format!("Session: {session_id}\n"));
    }
    out.push('\n');
    out.push_str("Message:\n");
    out.push_str(&format!("  {}\n\n", message.lines().next().unwrap_or_default()));

    if !files.is_empty() {
        out.push_str(&format!("Files Modified ({}):\n", files.len()));
        for file in &files {
            out.push_str(&format!("  - {file}\n"));
        }
        out.push('\n');
    }

    if !has_recorder_data {
        out.push_str("Note: No Entire session data available for this commit.\n");
    }

    print!("{out}");
    Ok(ExitCode::SUCCESS)
}

/// The default view: all checkpoints reachable on the current branch,
/// grouped by date, newest first.
fn explain_branch(
    ctx: &RepoContext,
    settings: &Settings,
    no_pager: bool,
) -> anyhow::Result<ExitCode> {
    let branch_name = match git_output(&ctx.root, &["rev-parse", "--abbrev-ref", "HEAD"]) {
        Some(name) if name != "HEAD" => name,
        _ => {
            let head = git_output(&ctx.root, &["rev-parse", "HEAD"]).unwrap_or_default();
            format!("HEAD ({})", &head[..7.min(head.len())])
        }
    };

    let agent = crate::resolve_agent(settings, ctx);
    let strategy = strategy_for(settings, ctx.clone(), agent, Box::new(AssumeYes))?;
    let points = strategy
        .get_rewind_points(DEFAULT_CHECKPOINT_LIMIT)
        .unwrap_or_default();

    let output = format_branch_checkpoints(&branch_name, &points);
    emit(&output, no_pager);
    Ok(ExitCode::SUCCESS)
}

fn format_branch_checkpoints(branch_name: &str, points: &[RewindPoint]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Branch: {branch_name}\n"));
    out.push_str(&format!("Checkpoints: {}\n", points.len()));

    if points.is_empty() {
        out.push_str("\nNo checkpoints found on this branch.\n");
        out.push_str("Checkpoints will appear here after an agent session saves changes.\n");
        return out;
    }
    out.push('\n');

    let mut current_date = String::new();
    for point in points {
        let date = point.date.format("%Y-%m-%d").to_string();
        if date != current_date {
            if !current_date.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("--- {date} ---\n"));
            current_date = date;
        }

        let mut id = point.checkpoint_id.clone();
        id.truncate(CHECKPOINT_ID_DISPLAY_LEN);
        out.push_str(&format!(
            "  {} [{}] {}\n",
            point.date.format("%H:%M"),
            id,
            truncate(&point.message, MAX_MESSAGE_DISPLAY_LEN)
        ));
        if !point.prompt.is_empty() {
            out.push_str(&format!(
                "         Prompt: {}\n",
                truncate(&point.prompt, MAX_PROMPT_DISPLAY_LEN)
            ));
        }
    }
    out.push('\n');
    out
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return s[..max_len].to_string();
    }
    format!("{}...", &s[..max_len - 3])
}

/// Print `content`, through `$PAGER` when stdout is a terminal and the
/// content is long.
fn emit(content: &str, no_pager: bool) {
    let stdout = std::io::stdout();
    if !no_pager && stdout.is_terminal() && content.lines().count() > PAGER_LINE_THRESHOLD {
        let pager = std::env::var("PAGER").unwrap_or_else(|_| "less".to_string());
        if let Ok(mut child) = Command::new(&pager).stdin(Stdio::piped()).spawn() {
            if let Some(stdin) = child.stdin.as_mut() {
                let _ = stdin.write_all(content.as_bytes());
            }
            let _ = child.wait();
            return;
        }
    }
    print!("{content}");
}
