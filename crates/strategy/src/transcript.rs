//! Minimal transcript readers: just enough of each agent's session format
//! to pull the first user prompt and aggregate token usage for checkpoint
//! metadata. Full transcript parsing stays out of the recorder.

use serde_json::Value;

use entire_core::agent::AgentKind;
use entire_git_native::TokenUsage;

/// Aggregate token usage across a transcript. `None` when the transcript
/// carries no usage data at all.
pub fn extract_token_usage(agent: AgentKind, transcript: &[u8]) -> Option<TokenUsage> {
    match agent {
        AgentKind::ClaudeCode => claude_token_usage(transcript),
        AgentKind::Gemini => gemini_token_usage(transcript),
    }
}

/// First user prompt in the transcript, if any.
pub fn first_prompt(agent: AgentKind, transcript: &[u8]) -> Option<String> {
    match agent {
        AgentKind::ClaudeCode => claude_first_prompt(transcript),
        AgentKind::Gemini => gemini_first_prompt(transcript),
    }
}

// Claude Code transcripts are JSONL; assistant lines carry
// message.usage.{input_tokens,output_tokens,cache_creation_input_tokens,
// cache_read_input_tokens}.
fn claude_token_usage(transcript: &[u8]) -> Option<TokenUsage> {
    let text = String::from_utf8_lossy(transcript);
    let mut usage = TokenUsage::default();
    let mut found = false;

    for line in text.lines() {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let entry = value
            .get("message")
            .and_then(|m| m.get("usage"))
            .or_else(|| value.get("usage"));
        if let Some(entry) = entry {
            found = true;
            usage.input += entry.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
            usage.output += entry
                .get("output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            usage.cache_creation += entry
                .get("cache_creation_input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            usage.cache_read += entry
                .get("cache_read_input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
        }
    }
    found.then_some(usage)
}

fn claude_first_prompt(transcript: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(transcript);
    for line in text.lines() {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if value.get("type").and_then(Value::as_str) != Some("user") {
            continue;
        }
        let content = value.get("message").and_then(|m| m.get("content"))?;
        match content {
            Value::String(s) if !s.is_empty() => return Some(s.clone()),
            Value::Array(blocks) => {
                for block in blocks {
                    if block.get("type").and_then(Value::as_str) == Some("text") {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            if !text.is_empty() {
                                return Some(text.to_string());
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

// Gemini CLI sessions are one JSON document with a messages array; token
// counts sit on each model message under `tokens`.
fn gemini_token_usage(transcript: &[u8]) -> Option<TokenUsage> {
    let value: Value = serde_json::from_slice(transcript).ok()?;
    let messages = value.get("messages")?.as_array()?;

    let mut usage = TokenUsage::default();
    let mut found = false;
    for message in messages {
        if let Some(tokens) = message.get("tokens") {
            found = true;
            usage.input += tokens.get("input").and_then(Value::as_u64).unwrap_or(0);
            usage.output += tokens.get("output").and_then(Value::as_u64).unwrap_or(0);
            usage.cache_read += tokens.get("cached").and_then(Value::as_u64).unwrap_or(0);
        }
    }
    found.then_some(usage)
}

fn gemini_first_prompt(transcript: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(transcript).ok()?;
    let messages = value.get("messages")?.as_array()?;
    for message in messages {
        if message.get("type").and_then(Value::as_str) == Some("user") {
            if let Some(content) = message.get("content").and_then(Value::as_str) {
                if !content.is_empty() {
                    return Some(content.to_string());
                }
            }
        }
    }
    None
}
