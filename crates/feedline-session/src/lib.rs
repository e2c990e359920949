//! Feed session manager.
//!
//! This crate keeps a canonical structure log ($HEAD) and the per-observer
//! sessions derived from it:
//! - a single-worker priority task queue that serializes every mutation
//! - a content cache scoped to the latest commit
//! - $HEAD, bound and unbound sessions, kept current by commits
//! - session expiry, journal cleanup and content garbage collection
//!
//! # Example
//!
//! ```rust,ignore
//! use feedline_session::{FeedSessionManager, ManagerConfig, MemoryStore};
//!
//! let manager = FeedSessionManager::builder()
//!     .with_store(Arc::new(MemoryStore::new()))
//!     .with_request_manager(request_manager)
//!     .with_scheduler(scheduler)
//!     .with_config(ManagerConfig::from_config(&config))
//!     .build()?;
//!
//! manager.get_new_session(observer);
//! ```

mod committer;
mod content_cache;
mod error;
mod factory;
mod manager;
mod memory_store;
mod session;
mod task_queue;
mod thread;

pub use committer::CommitterTask;
pub use content_cache::ContentCache;
pub use error::{Result, SessionError};
pub use factory::SessionFactory;
pub use manager::{FeedSessionManager, FeedSessionManagerBuilder, ManagerConfig, ManagerStats};
pub use memory_store::MemoryStore;
pub use session::{
    BoundSession, HeadSession, Session, SessionKind, UnboundSession, UpdateSummary,
    is_session_alive,
};
pub use task_queue::{TaskQueue, TaskQueueSettings, TaskQueueStats, TaskType};
pub use thread::ThreadChecker;
