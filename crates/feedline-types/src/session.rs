//! Persisted session identity.

use serde::{Deserialize, Serialize};

/// Stream token of the canonical, never-expiring structure log.
pub const HEAD_TOKEN: &str = "$HEAD";

/// Reserved content id under which the session index is persisted.
pub const SESSIONS_CONTENT_ID: &str = "FSM::Sessions";

/// Persisted identity of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamSession {
    /// Unique key of the session.
    pub stream_token: String,
    /// Epoch millis of the last access, used for expiry.
    pub last_accessed: i64,
}

impl StreamSession {
    pub fn new(stream_token: impl Into<String>, last_accessed: i64) -> Self {
        Self {
            stream_token: stream_token.into(),
            last_accessed,
        }
    }

    /// The $HEAD session record.
    pub fn head(last_accessed: i64) -> Self {
        Self::new(HEAD_TOKEN, last_accessed)
    }

    pub fn is_head(&self) -> bool {
        self.stream_token == HEAD_TOKEN
    }
}
