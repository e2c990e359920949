//! In-memory projections of the structure log.
//!
//! [`HeadSession`] is the single authoritative $HEAD log. Every other
//! session is a consumer-bound view derived from $HEAD when it was created
//! and kept current by later commits. A derived view is [`BoundSession`]
//! while an observer is attached and [`UnboundSession`] when restored from
//! persisted metadata without one.

mod derived;
mod head;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use feedline_types::{ModelProvider, StreamSession, StreamStructure, StreamToken};

pub use derived::{BoundSession, UnboundSession};
pub use head::HeadSession;

/// Variant tag of a [`Session`], for stats and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Head,
    Bound,
    Unbound,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Bound => "bound",
            Self::Unbound => "unbound",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one `update_session` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// False when the batch was dropped as a stale continuation.
    pub applied: bool,
    pub appended: usize,
    pub updated: usize,
    pub removed: usize,
    pub cleared: usize,
    /// Operations that changed nothing (REMOVE of absent ids, unknown ops,
    /// CLEAR_ALL on a derived session).
    pub ignored: usize,
}

impl UpdateSummary {
    pub(crate) fn stale() -> Self {
        Self::default()
    }

    pub(crate) fn applied() -> Self {
        Self {
            applied: true,
            ..Self::default()
        }
    }
}

/// A runtime session.
pub enum Session {
    Head(HeadSession),
    Bound(BoundSession),
    Unbound(UnboundSession),
}

impl Session {
    pub fn kind(&self) -> SessionKind {
        match self {
            Session::Head(_) => SessionKind::Head,
            Session::Bound(_) => SessionKind::Bound,
            Session::Unbound(_) => SessionKind::Unbound,
        }
    }

    pub fn stream_session(&self) -> &StreamSession {
        match self {
            Session::Head(head) => head.stream_session(),
            Session::Bound(bound) => bound.stream_session(),
            Session::Unbound(unbound) => unbound.stream_session(),
        }
    }

    pub fn token(&self) -> &str {
        &self.stream_session().stream_token
    }

    pub fn content_in_session(&self) -> &HashSet<String> {
        match self {
            Session::Head(head) => head.content_in_session(),
            Session::Bound(bound) => bound.content_in_session(),
            Session::Unbound(unbound) => unbound.content_in_session(),
        }
    }

    pub fn update_access_time(&mut self, time: i64) {
        match self {
            Session::Head(head) => head.update_access_time(time),
            Session::Bound(bound) => bound.update_access_time(time),
            Session::Unbound(unbound) => unbound.update_access_time(time),
        }
    }

    /// Apply a committed batch of structural operations.
    pub fn update_session(
        &mut self,
        structures: &[StreamStructure],
        mutation_source_token: Option<&StreamToken>,
    ) -> UpdateSummary {
        match self {
            Session::Head(head) => head.update_session(structures, mutation_source_token),
            Session::Bound(bound) => bound.update_session(structures, mutation_source_token),
            Session::Unbound(unbound) => unbound.update_session(structures, mutation_source_token),
        }
    }

    /// The attached observer, if any.
    pub fn model_provider(&self) -> Option<&Arc<dyn ModelProvider>> {
        match self {
            Session::Bound(bound) => Some(bound.model_provider()),
            Session::Head(_) | Session::Unbound(_) => None,
        }
    }

    pub fn is_head(&self) -> bool {
        matches!(self, Session::Head(_))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind())
            .field("stream_session", self.stream_session())
            .field("content", &self.content_in_session().len())
            .finish()
    }
}

/// Whether a session is still within its lifetime. $HEAD never expires.
pub fn is_session_alive(session: &StreamSession, now: i64, lifetime: Duration) -> bool {
    if session.is_head() {
        return true;
    }
    let lifetime_ms = i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX);
    now.saturating_sub(session.last_accessed) <= lifetime_ms
}
