//! Hook payloads exchanged with the agents on stdin.

use serde::Deserialize;
use std::path::PathBuf;

use entire_core::agent::AgentKind;

use crate::error::StrategyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// Gemini fires this before each agent turn.
    BeforeAgent,
    /// Claude fires this when the user submits a prompt.
    UserPromptSubmit,
    /// Claude's end-of-turn event; carries the transcript path.
    Stop,
    /// Gemini's end-of-session event; carries the transcript path.
    SessionEnd,
}

#[derive(Debug, Clone)]
pub struct HookInput {
    pub session_id: String,
    pub transcript_path: Option<PathBuf>,
    pub event: HookEvent,
}

#[derive(Debug, Deserialize)]
struct ClaudePayload {
    session_id: String,
    #[serde(default)]
    transcript_path: Option<PathBuf>,
    hook_event_name: String,
}

#[derive(Debug, Deserialize)]
struct GeminiPayload {
    session_id: String,
    #[serde(default)]
    transcript_path: Option<PathBuf>,
    event: String,
}

/// Parse a hook payload in the dialect of `agent`.
pub fn parse_hook_input(agent: AgentKind, payload: &str) -> Result<HookInput, StrategyError> {
    match agent {
        AgentKind::ClaudeCode => {
            let p: ClaudePayload = serde_json::from_str(payload)?;
            let event = match p.hook_event_name.as_str() {
                "UserPromptSubmit" => HookEvent::UserPromptSubmit,
                "Stop" | "SubagentStop" => HookEvent::Stop,
                "SessionEnd" => HookEvent::SessionEnd,
                other => {
                    return Err(StrategyError::Other(format!("unknown hook event: {other}")))
                }
            };
            Ok(HookInput {
                session_id: p.session_id,
                transcript_path: p.transcript_path,
                event,
            })
        }
        AgentKind::Gemini => {
            let p: GeminiPayload = serde_json::from_str(payload)?;
            let event = match p.event.as_str() {
                "BeforeAgent" => HookEvent::BeforeAgent,
                "SessionEnd" => HookEvent::SessionEnd,
                other => {
                    return Err(StrategyError::Other(format!("unknown hook event: {other}")))
                }
            };
            Ok(HookInput {
                session_id: p.session_id,
                transcript_path: p.transcript_path,
                event,
            })
        }
    }
}
