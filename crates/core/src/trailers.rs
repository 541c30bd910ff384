//! Structured commit-message trailers in the `Entire-*` namespace.
//!
//! Trailers sit in the final paragraph of a commit message, one `Key: value`
//! per line, in git's usual trailer convention. Checkpoint commits carry the
//! checkpoint id, session id, metadata path and agent type this way so the
//! commits stay self-describing without any out-of-band index.

pub const CHECKPOINT_TRAILER: &str = "Entire-Checkpoint";
pub const SESSION_TRAILER: &str = "Entire-Session";
pub const METADATA_TRAILER: &str = "Entire-Metadata";
pub const AGENT_TRAILER: &str = "Entire-Agent";

/// Parse the trailer block of `message`: the last paragraph in which every
/// line is `Key: value`. Returns the trailers in file order; an empty vec
/// when the last paragraph is prose.
pub fn parse_trailers(message: &str) -> Vec<(String, String)> {
    let trimmed = message.trim_end_matches('\n');
    let block = match trimmed.rsplit_once("\n\n") {
        Some((_, block)) => block,
        None => trimmed,
    };

    let mut out = Vec::new();
    for line in block.lines() {
        match parse_trailer_line(line) {
            Some(kv) => out.push(kv),
            None => return Vec::new(),
        }
    }
    out
}

/// Look up one trailer value in `message`.
pub fn parse_trailer(message: &str, key: &str) -> Option<String> {
    parse_trailers(message)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

/// Append a trailer block to `message`, separating it from the body with a
/// blank line. Appending to a message that already ends in trailers would
/// merge the blocks, so callers build the full message once.
pub fn append_trailers(message: &str, trailers: &[(&str, &str)]) -> String {
    let mut out = message.trim_end_matches('\n').to_string();
    out.push_str("\n\n");
    for (key, value) in trailers {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out
}

fn parse_trailer_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(": ")?;
    let key_ok = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-');
    if key_ok && !value.is_empty() {
        Some((key.to_string(), value.trim_end().to_string()))
    } else {
        None
    }
}
