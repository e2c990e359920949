//! Request layer contract.

use crate::mutation::{RequestReason, StreamDataOperation};
use crate::payload::StreamToken;

/// Error reported by the request layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    #[error("request failed: {0}")]
    Failed(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Outcome of one request: the ordered data operations it produced.
pub type UpdateResult = std::result::Result<Vec<StreamDataOperation>, RequestError>;

/// Callback receiving the outcome of a request. Called at most once.
pub type UpdateConsumer = Box<dyn FnOnce(UpdateResult) + Send>;

/// Trait for the network layer that supplies new data operations.
///
/// Implementations may invoke the consumer on any thread, synchronously or
/// later.
pub trait RequestManager: Send + Sync {
    /// Request a full refresh of $HEAD.
    fn trigger_refresh(&self, reason: RequestReason, consumer: UpdateConsumer);

    /// Request the page behind a continuation token.
    fn load_more(&self, token: &StreamToken, consumer: UpdateConsumer);
}
