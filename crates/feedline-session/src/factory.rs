//! Session construction.

use std::sync::Arc;

use feedline_types::{ModelProvider, Store, StreamSession};

use crate::session::{BoundSession, HeadSession, UnboundSession};

/// Builds sessions wired to the shared store.
#[derive(Clone)]
pub struct SessionFactory {
    store: Arc<dyn Store>,
}

impl SessionFactory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn create_head_session(&self) -> HeadSession {
        HeadSession::new(self.store.get_head_session(), Arc::clone(&self.store))
    }

    pub fn create_session(
        &self,
        stream_session: StreamSession,
        model_provider: Arc<dyn ModelProvider>,
    ) -> BoundSession {
        BoundSession::new(stream_session, Arc::clone(&self.store), model_provider)
    }

    pub fn create_unbound_session(&self, stream_session: StreamSession) -> UnboundSession {
        UnboundSession::new(stream_session, Arc::clone(&self.store))
    }
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory").finish_non_exhaustive()
    }
}
