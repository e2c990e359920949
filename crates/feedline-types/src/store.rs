//! Persistent store contract.
//!
//! The store owns content payloads, shared states, semantic properties and
//! one structure journal per session. The session manager never caches a
//! journal; it reads it back whenever a session is built or restored.

use std::collections::HashSet;

use crate::mutation::{ContentMutation, SemanticPropertiesMutation, SessionMutation};
use crate::payload::{PayloadWithId, StreamSharedState};
use crate::session::StreamSession;
use crate::structure::StreamStructure;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A read could not be served.
    #[error("store read failed: {0}")]
    Read(String),

    /// A write could not be committed.
    #[error("store write failed: {0}")]
    Write(String),

    /// The session journal does not exist.
    #[error("session journal not found: {0}")]
    SessionNotFound(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Supplies the content ids that must survive a content GC pass.
pub type ReachableContent = Box<dyn Fn() -> HashSet<String> + Send + Sync>;

/// Deferred content GC pass returned by [`Store::trigger_content_gc`].
pub type ContentGcTask = Box<dyn FnOnce() + Send>;

/// Trait for persistent content and session storage.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; calls arrive from the session
/// manager's worker thread.
pub trait Store: Send + Sync {
    /// Load every persisted shared state.
    fn get_shared_states(&self) -> StoreResult<Vec<StreamSharedState>>;

    /// The $HEAD session record.
    fn get_head_session(&self) -> StreamSession;

    /// Read the structure journal of `session`, in log order.
    fn get_stream_structures(&self, session: &StreamSession) -> StoreResult<Vec<StreamStructure>>;

    /// Create a new session journal seeded with a copy of the $HEAD journal.
    fn create_new_session(&self) -> StoreResult<StreamSession>;

    /// List every persisted session journal, $HEAD included.
    fn get_all_sessions(&self) -> StoreResult<Vec<StreamSession>>;

    /// Delete a session journal. Removing $HEAD is a no-op.
    fn remove_session(&self, session: &StreamSession) -> StoreResult<()>;

    /// Write content payloads.
    fn commit_content(&self, mutation: ContentMutation) -> StoreResult<()>;

    /// Write semantic properties.
    fn commit_semantic_properties(&self, mutation: SemanticPropertiesMutation) -> StoreResult<()>;

    /// Append structures to a session journal.
    fn commit_session(&self, mutation: SessionMutation) -> StoreResult<()>;

    /// Batched payload read. Missing ids are omitted from the result.
    fn get_payloads(&self, content_ids: &[String]) -> StoreResult<Vec<PayloadWithId>>;

    /// Truncate the $HEAD journal.
    fn clear_head(&self) -> StoreResult<()>;

    /// Build a content GC pass. Content ids that are neither reserved nor
    /// returned by `reachable` at run time are deleted.
    fn trigger_content_gc(
        &self,
        reserved_ids: HashSet<String>,
        reachable: ReachableContent,
    ) -> ContentGcTask;
}
