//! Shared types for the Feedline feed session manager.
//!
//! This crate holds the data model that flows between the session manager
//! and its collaborators, and the traits those collaborators implement:
//!
//! - [`Store`] - persistent content and session journals
//! - [`RequestManager`] - network layer producing new data operations
//! - [`SchedulerApi`] - host policy deciding when to request data
//! - [`ModelProvider`] - UI-facing observer of a session
//!
//! Keeping the contracts here lets hosts implement them without depending
//! on the session manager itself.

pub mod clock;
pub mod config;
pub mod model;
pub mod mutation;
pub mod payload;
pub mod request;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod structure;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{
    ConfigProvider, HasSessionConfig, HasTaskQueueConfig, SessionConfigProvider,
    TaskQueueConfigProvider, defaults as config_defaults,
};
pub use model::{ModelMutation, ModelProvider};
pub use mutation::{
    ContentMutation, MutationContext, RequestReason, SemanticPropertiesMutation, SessionMutation,
    StreamDataOperation,
};
pub use payload::{
    PayloadWithId, StreamFeature, StreamPayload, StreamSessions, StreamSharedState, StreamToken,
};
pub use request::{RequestError, RequestManager, UpdateConsumer, UpdateResult};
pub use scheduler::{RequestBehavior, SchedulerApi, SessionState};
pub use session::{HEAD_TOKEN, SESSIONS_CONTENT_ID, StreamSession};
pub use store::{ContentGcTask, ReachableContent, Store, StoreError, StoreResult};
pub use structure::{Operation, StreamStructure};
