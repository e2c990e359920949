//! UI-facing observer contract.
//!
//! A [`ModelProvider`] observes exactly one session. Structural changes are
//! delivered as one [`ModelMutation`] per commit so the observer sees them
//! atomically.

use crate::payload::StreamToken;
use crate::session::StreamSession;
use crate::structure::StreamStructure;

/// A batch of changes to an observer's model, applied on `commit`.
pub trait ModelMutation: Send {
    fn add_child(&mut self, structure: &StreamStructure);

    fn update_child(&mut self, structure: &StreamStructure);

    fn remove_child(&mut self, structure: &StreamStructure);

    /// Whether the content this batch references is already warm in the
    /// content cache.
    fn has_cached_bindings(&mut self, cached_bindings: bool);

    /// The continuation token whose load produced this batch.
    fn set_mutation_source_token(&mut self, token: &StreamToken);

    fn set_stream_session(&mut self, session: &StreamSession);

    fn commit(self: Box<Self>);
}

/// The observer bound to a session.
pub trait ModelProvider: Send + Sync {
    /// Open a mutation batch.
    fn edit(&self) -> Box<dyn ModelMutation>;

    /// Drop the model; the observer must request a new session.
    fn invalidate(&self);

    /// Token of the session this observer currently displays, once known.
    fn session_token(&self) -> Option<String>;
}
