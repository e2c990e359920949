//! In-memory [`Store`] for tests and embedding without persistence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use feedline_types::{
    Clock, ContentGcTask, ContentMutation, HEAD_TOKEN, PayloadWithId, ReachableContent,
    SemanticPropertiesMutation, SessionMutation, Store, StoreError, StoreResult, StreamPayload,
    StreamSession, StreamSharedState, StreamStructure, SystemClock,
};
use parking_lot::Mutex;
use tracing::{debug, info};

struct Journal {
    session: StreamSession,
    structures: Vec<StreamStructure>,
}

impl Journal {
    fn new(session: StreamSession) -> Self {
        Self {
            session,
            structures: Vec::new(),
        }
    }
}

struct StoreState {
    journals: HashMap<String, Journal>,
    content: HashMap<String, StreamPayload>,
    semantic: HashMap<String, Vec<u8>>,
}

struct Inner {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl Inner {
    fn check_read(&self, op: &str) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read(format!("{op}: injected failure")));
        }
        Ok(())
    }

    fn check_write(&self, op: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write(format!("{op}: injected failure")));
        }
        Ok(())
    }
}

/// A [`Store`] that keeps journals and content in memory.
///
/// The $HEAD journal always exists. New sessions start as a copy of $HEAD.
/// Reads and writes can be made to fail for exercising error paths.
///
/// Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Stamp new sessions with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut journals = HashMap::new();
        journals.insert(
            HEAD_TOKEN.to_string(),
            Journal::new(StreamSession::head(0)),
        );
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState {
                    journals,
                    content: HashMap::new(),
                    semantic: HashMap::new(),
                }),
                clock,
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
            }),
        }
    }

    /// Make every read fail until turned off.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail until turned off.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Tokens of every journal, $HEAD included.
    pub fn journal_tokens(&self) -> HashSet<String> {
        self.inner.state.lock().journals.keys().cloned().collect()
    }

    pub fn has_journal(&self, token: &str) -> bool {
        self.inner.state.lock().journals.contains_key(token)
    }

    /// Ids of all stored content payloads.
    pub fn content_ids(&self) -> HashSet<String> {
        self.inner.state.lock().content.keys().cloned().collect()
    }

    pub fn content(&self, content_id: &str) -> Option<StreamPayload> {
        self.inner.state.lock().content.get(content_id).cloned()
    }

    pub fn semantic_data(&self, content_id: &str) -> Option<Vec<u8>> {
        self.inner.state.lock().semantic.get(content_id).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryStore")
            .field("journals", &state.journals.len())
            .field("content", &state.content.len())
            .field("semantic", &state.semantic.len())
            .finish()
    }
}

impl Store for MemoryStore {
    fn get_shared_states(&self) -> StoreResult<Vec<StreamSharedState>> {
        self.inner.check_read("get_shared_states")?;
        let state = self.inner.state.lock();
        Ok(state
            .content
            .values()
            .filter_map(|payload| payload.as_shared_state().cloned())
            .collect())
    }

    fn get_head_session(&self) -> StreamSession {
        StreamSession::head(0)
    }

    fn get_stream_structures(&self, session: &StreamSession) -> StoreResult<Vec<StreamStructure>> {
        self.inner.check_read("get_stream_structures")?;
        let state = self.inner.state.lock();
        Ok(state
            .journals
            .get(&session.stream_token)
            .map(|journal| journal.structures.clone())
            .unwrap_or_default())
    }

    fn create_new_session(&self) -> StoreResult<StreamSession> {
        self.inner.check_write("create_new_session")?;
        let session = StreamSession::new(
            uuid::Uuid::new_v4().to_string(),
            self.inner.clock.current_time_millis(),
        );
        let mut state = self.inner.state.lock();
        let head = state
            .journals
            .get(HEAD_TOKEN)
            .map(|journal| journal.structures.clone())
            .unwrap_or_default();
        debug!(session = %session.stream_token, copied = head.len(), "Created session journal");
        state.journals.insert(
            session.stream_token.clone(),
            Journal {
                session: session.clone(),
                structures: head,
            },
        );
        Ok(session)
    }

    fn get_all_sessions(&self) -> StoreResult<Vec<StreamSession>> {
        self.inner.check_read("get_all_sessions")?;
        let state = self.inner.state.lock();
        Ok(state
            .journals
            .values()
            .filter(|journal| !journal.session.is_head())
            .map(|journal| journal.session.clone())
            .collect())
    }

    fn remove_session(&self, session: &StreamSession) -> StoreResult<()> {
        if session.is_head() {
            return Ok(());
        }
        self.inner.check_write("remove_session")?;
        match self.inner.state.lock().journals.remove(&session.stream_token) {
            Some(_) => Ok(()),
            None => Err(StoreError::SessionNotFound(session.stream_token.clone())),
        }
    }

    fn commit_content(&self, mutation: ContentMutation) -> StoreResult<()> {
        self.inner.check_write("commit_content")?;
        let mut state = self.inner.state.lock();
        for (content_id, payload) in mutation.into_items() {
            state.content.insert(content_id, payload);
        }
        Ok(())
    }

    fn commit_semantic_properties(&self, mutation: SemanticPropertiesMutation) -> StoreResult<()> {
        self.inner.check_write("commit_semantic_properties")?;
        let mut state = self.inner.state.lock();
        for (content_id, data) in mutation.into_items() {
            state.semantic.insert(content_id, data);
        }
        Ok(())
    }

    fn commit_session(&self, mutation: SessionMutation) -> StoreResult<()> {
        self.inner.check_write("commit_session")?;
        let (session, structures) = mutation.into_parts();
        let mut state = self.inner.state.lock();
        state
            .journals
            .entry(session.stream_token.clone())
            .or_insert_with(|| Journal::new(session))
            .structures
            .extend(structures);
        Ok(())
    }

    fn get_payloads(&self, content_ids: &[String]) -> StoreResult<Vec<PayloadWithId>> {
        self.inner.check_read("get_payloads")?;
        let state = self.inner.state.lock();
        Ok(content_ids
            .iter()
            .filter_map(|id| {
                state
                    .content
                    .get(id)
                    .map(|payload| PayloadWithId::new(id.clone(), payload.clone()))
            })
            .collect())
    }

    fn clear_head(&self) -> StoreResult<()> {
        self.inner.check_write("clear_head")?;
        let mut state = self.inner.state.lock();
        if let Some(head) = state.journals.get_mut(HEAD_TOKEN) {
            head.structures.clear();
        }
        Ok(())
    }

    /// Content survives if it is reserved, reachable, or a shared state.
    fn trigger_content_gc(
        &self,
        reserved_ids: HashSet<String>,
        reachable: ReachableContent,
    ) -> ContentGcTask {
        let inner = Arc::clone(&self.inner);
        Box::new(move || {
            let reachable = reachable();
            let mut state = inner.state.lock();
            let before = state.content.len() + state.semantic.len();
            let keep = |id: &String| reserved_ids.contains(id) || reachable.contains(id);
            state.content.retain(|id, payload| {
                keep(id) || matches!(payload, StreamPayload::SharedState(_))
            });
            state.semantic.retain(|id, _| keep(id));
            let removed = before - state.content.len() - state.semantic.len();
            info!(removed, reachable = reachable.len(), "Content garbage collection finished");
        })
    }
}
