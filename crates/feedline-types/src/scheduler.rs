//! Host scheduling policy contract.

/// Snapshot of $HEAD handed to the scheduler when a session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub has_content: bool,
    /// Millis since content was last received. Zero without content.
    pub content_age_ms: i64,
    pub has_outstanding_request: bool,
}

/// What the session manager should do about fresh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestBehavior {
    NoRequest,
    /// Open from current content and refresh afterwards.
    Request,
    /// Refresh first, then open from the new content.
    RequestWithWait,
}

/// Trait for the host scheduler deciding when fresh data is requested.
pub trait SchedulerApi: Send + Sync {
    fn should_session_request_data(&self, state: &SessionState) -> RequestBehavior;

    /// New content was committed at `content_creation_time` (epoch millis).
    fn on_receive_new_content(&self, _content_creation_time: i64) {}

    /// A request finished without data.
    fn on_request_error(&self) {}
}
