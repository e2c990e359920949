//! Inbound data operations and the write batches handed to the store.

use serde::{Deserialize, Serialize};

use crate::payload::{StreamPayload, StreamToken};
use crate::session::StreamSession;
use crate::structure::StreamStructure;

/// One unit of new data: a structural change plus the content it binds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDataOperation {
    pub structure: StreamStructure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StreamPayload>,
}

impl StreamDataOperation {
    pub fn new(structure: StreamStructure, payload: Option<StreamPayload>) -> Self {
        Self { structure, payload }
    }

    /// A structure-only operation (REMOVE, CLEAR_ALL).
    pub fn structural(structure: StreamStructure) -> Self {
        Self::new(structure, None)
    }

    /// An `UPDATE_OR_APPEND` binding `payload` to `structure.content_id`.
    pub fn with_payload(structure: StreamStructure, payload: StreamPayload) -> Self {
        Self::new(structure, Some(payload))
    }
}

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestReason {
    /// The user asked for fresh content.
    ManualRefresh,
    /// A session opened with no content in $HEAD.
    OpenWithoutContent,
    /// A session opened over stale content.
    OpenWithContent,
}

/// Describes where a batch of data operations came from.
///
/// A batch loaded from a continuation token carries that token and the
/// session that asked for it, so sessions that no longer contain the token
/// can drop the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationContext {
    pub continuation_token: Option<StreamToken>,
    pub requesting_session: Option<String>,
    pub reason: Option<RequestReason>,
}

impl MutationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_continuation_token(mut self, token: StreamToken) -> Self {
        self.continuation_token = Some(token);
        self
    }

    pub fn with_requesting_session(mut self, session_token: impl Into<String>) -> Self {
        self.requesting_session = Some(session_token.into());
        self
    }

    pub fn with_reason(mut self, reason: RequestReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Content writes accumulated during one commit.
#[derive(Debug, Clone, Default)]
pub struct ContentMutation {
    items: Vec<(String, StreamPayload)>,
}

impl ContentMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, content_id: impl Into<String>, payload: StreamPayload) -> &mut Self {
        self.items.push((content_id.into(), payload));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<(String, StreamPayload)> {
        self.items
    }
}

/// Semantic-properties writes accumulated during one commit.
#[derive(Debug, Clone, Default)]
pub struct SemanticPropertiesMutation {
    items: Vec<(String, Vec<u8>)>,
}

impl SemanticPropertiesMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, content_id: impl Into<String>, data: Vec<u8>) -> &mut Self {
        self.items.push((content_id.into(), data));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<(String, Vec<u8>)> {
        self.items
    }
}

/// Structure-log appends for one session journal.
#[derive(Debug, Clone)]
pub struct SessionMutation {
    stream_session: StreamSession,
    structures: Vec<StreamStructure>,
}

impl SessionMutation {
    pub fn new(stream_session: StreamSession) -> Self {
        Self {
            stream_session,
            structures: Vec::new(),
        }
    }

    pub fn add(&mut self, structure: StreamStructure) -> &mut Self {
        self.structures.push(structure);
        self
    }

    pub fn stream_session(&self) -> &StreamSession {
        &self.stream_session
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    pub fn into_parts(self) -> (StreamSession, Vec<StreamStructure>) {
        (self.stream_session, self.structures)
    }
}
