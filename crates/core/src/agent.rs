//! The agent table and the per-agent hook-response encodings.
//!
//! All supported agents are known at build time; a static table replaces any
//! runtime registration. Session state stores the human-readable agent type
//! ("Claude Code"), settings and CLI flags use the registry name
//! ("claude-code"), and both resolve through this module.

use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    ClaudeCode,
    Gemini,
}

pub const DEFAULT_AGENT: AgentKind = AgentKind::ClaudeCode;

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::ClaudeCode, AgentKind::Gemini];

    /// Internal registry identifier, as used in settings and on the CLI.
    pub fn registry_name(self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "claude-code",
            AgentKind::Gemini => "gemini",
        }
    }

    /// Human-readable type name, as stored in session state and metadata.
    pub fn display_name(self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "Claude Code",
            AgentKind::Gemini => "Gemini CLI",
        }
    }

    pub fn from_registry_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.registry_name() == name)
    }

    /// Resolve either a display name or a registry name.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.display_name() == name)
            .or_else(|| Self::from_registry_name(name))
    }

    /// Whether this agent appears to be configured in the repository.
    pub fn detect_presence(self, repo_root: &Path) -> bool {
        match self {
            AgentKind::ClaudeCode => repo_root.join(".claude").is_dir(),
            AgentKind::Gemini => repo_root.join(".gemini").is_dir(),
        }
    }

    /// The command a user runs to resume one of this agent's sessions.
    /// Takes the agent-side session id (legacy date prefixes stripped).
    pub fn resume_command(self, session_id: &str) -> String {
        let raw = crate::session_id::agent_session_id(session_id);
        match self {
            AgentKind::ClaudeCode => format!("claude -r {raw}"),
            AgentKind::Gemini => format!("gemini --resume {raw}"),
        }
    }

    /// A full resume instruction for use in a blocking message. Gemini holds
    /// a terminal lock, so its instruction tells the user to close it first.
    pub fn resume_hint(self, session_id: &str) -> String {
        match self {
            AgentKind::ClaudeCode => {
                format!("resume it with: {}", self.resume_command(session_id))
            }
            AgentKind::Gemini => format!(
                "close Gemini CLI, then resume it with: {}",
                self.resume_command(session_id)
            ),
        }
    }
}

/// Auto-detect the agent in use from repository markers. First match in
/// table order wins.
pub fn detect(repo_root: &Path) -> Option<AgentKind> {
    AgentKind::ALL
        .into_iter()
        .find(|a| a.detect_presence(repo_root))
}

/// The engine's answer to a hook event.
///
/// Each agent speaks its own decision dialect, so the response is kept as a
/// tagged value and encoded at the boundary by the agent that will read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResponse {
    /// Empty stdout; the agent proceeds normally.
    Passthrough,
    /// Stop the agent and surface `reason` to the user.
    Block { reason: String },
    /// Explicitly allow the agent to continue.
    Continue,
}

impl HookResponse {
    pub fn block(reason: impl Into<String>) -> Self {
        HookResponse::Block {
            reason: reason.into(),
        }
    }

    /// Encode for the agent that invoked the hook. `None` means print
    /// nothing (passthrough).
    pub fn render(&self, agent: AgentKind) -> Option<String> {
        match (self, agent) {
            (HookResponse::Passthrough, _) => None,
            (HookResponse::Block { reason }, AgentKind::ClaudeCode) => {
                Some(json!({ "continue": false, "stopReason": reason }).to_string())
            }
            (HookResponse::Block { reason }, AgentKind::Gemini) => {
                Some(json!({ "decision": "block", "reason": reason }).to_string())
            }
            (HookResponse::Continue, AgentKind::ClaudeCode) => {
                Some(json!({ "continue": true }).to_string())
            }
            // Gemini has no affirmative decision shape; silence means go.
            (HookResponse::Continue, AgentKind::Gemini) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips() {
        for agent in AgentKind::ALL {
            assert_eq!(
                AgentKind::from_registry_name(agent.registry_name()),
                Some(agent)
            );
            assert_eq!(AgentKind::from_type_name(agent.display_name()), Some(agent));
            assert_eq!(
                AgentKind::from_type_name(agent.registry_name()),
                Some(agent)
            );
        }
        assert_eq!(AgentKind::from_registry_name("cursor"), None);
    }

    #[test]
    fn resume_commands_strip_legacy_prefixes() {
        assert_eq!(
            AgentKind::ClaudeCode.resume_command("2026-01-23-abc-def"),
            "claude -r abc-def"
        );
        assert_eq!(
            AgentKind::Gemini.resume_command("abc-def"),
            "gemini --resume abc-def"
        );
        assert!(AgentKind::Gemini
            .resume_hint("abc-def")
            .contains("close Gemini CLI"));
    }

    #[test]
    fn block_encodings_match_each_dialect() {
        let block = HookResponse::block("try again later");
        assert_eq!(
            block.render(AgentKind::ClaudeCode).unwrap(),
            r#"{"continue":false,"stopReason":"try again later"}"#
        );
        assert_eq!(
            block.render(AgentKind::Gemini).unwrap(),
            r#"{"decision":"block","reason":"try again later"}"#
        );
    }

    #[test]
    fn passthrough_renders_nothing() {
        assert_eq!(HookResponse::Passthrough.render(AgentKind::ClaudeCode), None);
        assert_eq!(HookResponse::Passthrough.render(AgentKind::Gemini), None);
        assert_eq!(HookResponse::Continue.render(AgentKind::Gemini), None);
        assert_eq!(
            HookResponse::Continue.render(AgentKind::ClaudeCode).unwrap(),
            r#"{"continue":true}"#
        );
    }

    #[test]
    fn detection_prefers_table_order() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(detect(tmp.path()), None);

        std::fs::create_dir(tmp.path().join(".gemini")).unwrap();
        assert_eq!(detect(tmp.path()), Some(AgentKind::Gemini));

        std::fs::create_dir(tmp.path().join(".claude")).unwrap();
        assert_eq!(detect(tmp.path()), Some(AgentKind::ClaudeCode));
    }
}
