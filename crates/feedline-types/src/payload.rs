//! Content payloads bound to content ids.

use serde::{Deserialize, Serialize};

use crate::session::StreamSession;

/// Feature content rendered by the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFeature {
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Opaque content body.
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Cross-session auxiliary content (rendering-wide configuration, etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSharedState {
    pub content_id: String,
    #[serde(default)]
    pub state: serde_json::Value,
}

/// Continuation token: "more data available beyond this point".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamToken {
    /// Content id of the token node inside the structure log.
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Opaque cursor handed back to the request layer.
    pub next_page_token: String,
}

impl StreamToken {
    pub fn new(content_id: impl Into<String>, next_page_token: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            parent_id: None,
            next_page_token: next_page_token.into(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// The persisted session index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSessions {
    pub sessions: Vec<StreamSession>,
}

/// Content bound to a content id. Kinds are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamPayload {
    Feature(StreamFeature),
    SharedState(StreamSharedState),
    Token(StreamToken),
    /// Opaque per-item client data, stored apart from content.
    SemanticData { data: Vec<u8> },
    /// Session index record, stored under the reserved sessions content id.
    Sessions(StreamSessions),
}

impl StreamPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Feature(_) => "feature",
            Self::SharedState(_) => "shared_state",
            Self::Token(_) => "token",
            Self::SemanticData { .. } => "semantic_data",
            Self::Sessions(_) => "sessions",
        }
    }

    pub fn as_shared_state(&self) -> Option<&StreamSharedState> {
        match self {
            Self::SharedState(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_sessions(&self) -> Option<&StreamSessions> {
        match self {
            Self::Sessions(sessions) => Some(sessions),
            _ => None,
        }
    }
}

/// A payload returned from a batched read, tagged with its content id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadWithId {
    pub content_id: String,
    pub payload: StreamPayload,
}

impl PayloadWithId {
    pub fn new(content_id: impl Into<String>, payload: StreamPayload) -> Self {
        Self {
            content_id: content_id.into(),
            payload,
        }
    }
}
