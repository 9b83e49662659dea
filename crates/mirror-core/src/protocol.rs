//! Push-channel messages.
//!
//! The server sends UTF-8 JSON frames tagged by `type`: a `hello` once per connection
//! carrying the build version, and a `files_changed` for every batch of changed paths.

use serde::{Deserialize, Serialize};

/// Maximum accepted frame size (50MB).
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// A message received over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushMessage {
    /// Sent once per connection, identifies the server build
    #[serde(rename = "hello", alias = "handshake")]
    Hello { version: String },

    /// A batch of changed paths, relative to the repository root
    #[serde(rename = "files_changed", alias = "changed")]
    FilesChanged {
        paths: Vec<String>,
        /// Repository name (multi-repo servers only)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo: Option<String>,
    },
}

impl PushMessage {
    /// Parse a frame's payload.
    ///
    /// Returns None for oversized payloads, invalid UTF-8, or unknown message types.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_MESSAGE_SIZE {
            return None;
        }
        let text = std::str::from_utf8(data).ok()?;
        serde_json::from_str(text).ok()
    }

    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).expect("PushMessage serialization should not fail")
    }
}

/// Outcome of observing a handshake version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    /// First handshake seen; the token is now recorded
    First,
    /// Same token as recorded
    Unchanged,
    /// The server restarted with a different build
    Changed { previous: String },
}

/// Remembers the build version from the first handshake.
#[derive(Debug, Clone, Default)]
pub struct VersionGuard {
    known: Option<String>,
}

impl VersionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `version` with the recorded token. The first token is never replaced.
    pub fn observe(&mut self, version: &str) -> VersionCheck {
        match &self.known {
            None => {
                self.known = Some(version.to_string());
                VersionCheck::First
            }
            Some(known) if known == version => VersionCheck::Unchanged,
            Some(known) => VersionCheck::Changed {
                previous: known.clone(),
            },
        }
    }

    pub fn known(&self) -> Option<&str> {
        self.known.as_deref()
    }
}
