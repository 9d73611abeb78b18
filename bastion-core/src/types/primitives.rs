use std::fmt;

use serde::{Deserialize, Serialize};

/// Shared-cache key namespaces. Every process must agree on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySpace {
    /// `lock:{resource_id}` -> holder token
    Lock,
    /// `session:{session_id}` -> serialized binding
    Session,
    /// `rate_limit:{operation}:{resource_id}` -> sorted set of events
    RateLimit,
    /// `agent_meta:{agent_id}` -> serialized payload
    AgentMeta,
}

impl KeySpace {
    pub fn prefix(self) -> &'static str {
        match self {
            KeySpace::Lock => "lock",
            KeySpace::Session => "session",
            KeySpace::RateLimit => "rate_limit",
            KeySpace::AgentMeta => "agent_meta",
        }
    }

    /// Creates the canonical key for `id` in this namespace.
    pub fn key(self, id: &str) -> String {
        format!("{}:{}", self.prefix(), id)
    }

    /// Glob matching every key in this namespace (used by scans).
    pub fn pattern(self) -> String {
        format!("{}:*", self.prefix())
    }

    /// Strips the namespace prefix back off a scanned key.
    pub fn strip<'a>(self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix())?.strip_prefix(':')
    }
}

impl fmt::Display for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Key for one (operation, resource) sliding window.
pub fn rate_limit_key(operation: &str, resource_id: &str) -> String {
    KeySpace::RateLimit.key(&format!("{}:{}", operation, resource_id))
}

/// Maps an arbitrary identifier onto a single path component, reversibly.
///
/// Bytes outside `[A-Za-z0-9._-]` are written as `%XX`, as is a leading dot,
/// so distinct ids never share a file and `..` cannot escape the parent
/// directory. The empty id encodes as `%`.
pub fn encode_file_component(id: &str) -> String {
    if id.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(id.len());
    for (i, b) in id.bytes().enumerate() {
        let keep = b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-') || (b == b'.' && i > 0);
        if keep {
            out.push(char::from(b));
        } else {
            out.push('%');
            out.push_str(&hex::encode_upper([b]));
        }
    }
    out
}

/// Inverse of [`encode_file_component`]. `None` for names it never produces.
pub fn decode_file_component(name: &str) -> Option<String> {
    if name == "%" {
        return Some(String::new());
    }
    let raw = name.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let pair = raw.get(i + 1..i + 3)?;
            bytes.extend(hex::decode(pair).ok()?);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).ok()
}
