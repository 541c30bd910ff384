//! Session id mapping between the recorder and the agents.
//!
//! A recorder session id is the agent's own session id, unchanged. Older
//! releases prefixed ids with the start date (`YYYY-MM-DD-<uuid>`); those
//! still appear in state files and resume commands, so the date prefix is
//! stripped when recovering the agent-side id.

/// The recorder session id for an agent session id. Identity: the agent's
/// session id is used as-is, which keeps the mapping derivable in both
/// directions.
pub fn entire_session_id(agent_session_id: &str) -> &str {
    agent_session_id
}

/// Recover the agent-side session id from a recorder session id, stripping
/// the legacy `YYYY-MM-DD-` prefix when present. Anything that does not look
/// like a date prefix is returned unchanged.
pub fn agent_session_id(session_id: &str) -> &str {
    let b = session_id.as_bytes();
    if b.len() > 11 && b[4] == b'-' && b[7] == b'-' && b[10] == b'-' {
        &session_id[11..]
    } else {
        session_id
    }
}
