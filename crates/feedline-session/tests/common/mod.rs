//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use anyhow::Result;
use feedline_config::FeedlineConfig;
use feedline_session::{FeedSessionManager, ManagerConfig, MemoryStore};
use feedline_types::{
    ContentMutation, FakeClock, ModelMutation, ModelProvider, MutationContext, RequestBehavior,
    RequestError, RequestManager, RequestReason, SchedulerApi, SessionState, Store,
    StreamDataOperation, StreamFeature, StreamPayload, StreamSession, StreamSharedState,
    StreamStructure, StreamToken, UpdateConsumer, UpdateResult,
};
use parking_lot::Mutex;

pub const IDLE: Duration = Duration::from_secs(5);

/// Fixed start time for the fake clock.
pub const T0: i64 = 1_700_000_000_000;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ─────────────────────────────────────────────────────────────────────────────
// Data operations
// ─────────────────────────────────────────────────────────────────────────────

pub fn feature(id: &str) -> StreamDataOperation {
    StreamDataOperation::with_payload(
        StreamStructure::update_or_append(id),
        StreamPayload::Feature(StreamFeature {
            content_id: id.to_string(),
            parent_id: None,
            content: serde_json::json!({ "title": id }),
        }),
    )
}

pub fn token(id: &str) -> StreamDataOperation {
    StreamDataOperation::with_payload(
        StreamStructure::update_or_append(id),
        StreamPayload::Token(StreamToken::new(id, format!("{id}-next"))),
    )
}

pub fn shared_state(id: &str) -> StreamDataOperation {
    StreamDataOperation::with_payload(
        StreamStructure::update_or_append(id),
        StreamPayload::SharedState(StreamSharedState {
            content_id: id.to_string(),
            state: serde_json::json!({ "theme": "dark" }),
        }),
    )
}

pub fn remove(id: &str) -> StreamDataOperation {
    StreamDataOperation::structural(StreamStructure::remove(id))
}

pub fn clear_all() -> StreamDataOperation {
    StreamDataOperation::structural(StreamStructure::clear_all())
}

/// Write a shared state straight into the store.
pub fn seed_shared_state(store: &MemoryStore, id: &str) -> Result<()> {
    let mut content = ContentMutation::new();
    content.add(
        id,
        StreamPayload::SharedState(StreamSharedState {
            content_id: id.to_string(),
            state: serde_json::json!({}),
        }),
    );
    store.commit_content(content)?;
    Ok(())
}

pub fn journal(store: &MemoryStore, token: &str) -> Result<Vec<StreamStructure>> {
    Ok(store.get_stream_structures(&StreamSession::new(token, 0))?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Observer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    Add(String),
    Update(String),
    Remove(String),
}

#[derive(Default)]
struct ObserverState {
    events: Vec<ObserverEvent>,
    session_token: Option<String>,
    cached_bindings: Option<bool>,
    source_tokens: Vec<String>,
    commits: usize,
}

/// A `ModelProvider` that records every mutation it receives.
#[derive(Default)]
pub struct RecordingObserver {
    state: Arc<Mutex<ObserverState>>,
    invalidations: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn token(&self) -> Option<String> {
        self.state.lock().session_token.clone()
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        self.state.lock().events.clone()
    }

    /// Children currently shown, in the order they were added.
    pub fn children(&self) -> Vec<String> {
        let mut children: Vec<String> = Vec::new();
        for event in self.state.lock().events.iter() {
            match event {
                ObserverEvent::Add(id) => children.push(id.clone()),
                ObserverEvent::Remove(id) => children.retain(|child| child != id),
                ObserverEvent::Update(_) => {}
            }
        }
        children
    }

    pub fn cached_bindings(&self) -> Option<bool> {
        self.state.lock().cached_bindings
    }

    pub fn source_tokens(&self) -> Vec<String> {
        self.state.lock().source_tokens.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }
}

struct PendingMutation {
    observer: Arc<Mutex<ObserverState>>,
    events: Vec<ObserverEvent>,
    session_token: Option<String>,
    cached_bindings: Option<bool>,
    source_token: Option<String>,
}

impl ModelMutation for PendingMutation {
    fn add_child(&mut self, structure: &StreamStructure) {
        self.events.push(ObserverEvent::Add(structure.content_id.clone()));
    }

    fn update_child(&mut self, structure: &StreamStructure) {
        self.events.push(ObserverEvent::Update(structure.content_id.clone()));
    }

    fn remove_child(&mut self, structure: &StreamStructure) {
        self.events.push(ObserverEvent::Remove(structure.content_id.clone()));
    }

    fn has_cached_bindings(&mut self, cached_bindings: bool) {
        self.cached_bindings = Some(cached_bindings);
    }

    fn set_mutation_source_token(&mut self, token: &StreamToken) {
        self.source_token = Some(token.content_id.clone());
    }

    fn set_stream_session(&mut self, session: &StreamSession) {
        self.session_token = Some(session.stream_token.clone());
    }

    fn commit(self: Box<Self>) {
        let PendingMutation {
            observer,
            events,
            session_token,
            cached_bindings,
            source_token,
        } = *self;
        let mut state = observer.lock();
        state.events.extend(events);
        if session_token.is_some() {
            state.session_token = session_token;
        }
        if cached_bindings.is_some() {
            state.cached_bindings = cached_bindings;
        }
        state.source_tokens.extend(source_token);
        state.commits += 1;
    }
}

impl ModelProvider for RecordingObserver {
    fn edit(&self) -> Box<dyn ModelMutation> {
        Box::new(PendingMutation {
            observer: Arc::clone(&self.state),
            events: Vec::new(),
            session_token: None,
            cached_bindings: None,
            source_token: None,
        })
    }

    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn session_token(&self) -> Option<String> {
        self.token()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request layer
// ─────────────────────────────────────────────────────────────────────────────

/// A `RequestManager` that answers refreshes from a script, or holds the
/// consumer until the test completes it.
#[derive(Default)]
pub struct ScriptedRequestManager {
    refresh_responses: Mutex<VecDeque<UpdateResult>>,
    load_more_responses: Mutex<VecDeque<UpdateResult>>,
    pending_refreshes: Mutex<VecDeque<UpdateConsumer>>,
    refresh_reasons: Mutex<Vec<RequestReason>>,
    loaded_tokens: Mutex<Vec<StreamToken>>,
}

impl ScriptedRequestManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_refresh(&self, result: UpdateResult) {
        self.refresh_responses.lock().push_back(result);
    }

    pub fn script_load_more(&self, result: UpdateResult) {
        self.load_more_responses.lock().push_back(result);
    }

    pub fn refresh_reasons(&self) -> Vec<RequestReason> {
        self.refresh_reasons.lock().clone()
    }

    pub fn loaded_tokens(&self) -> Vec<StreamToken> {
        self.loaded_tokens.lock().clone()
    }

    pub fn pending_refreshes(&self) -> usize {
        self.pending_refreshes.lock().len()
    }

    /// Answer the oldest unanswered refresh.
    pub fn complete_refresh(&self, result: UpdateResult) -> bool {
        let consumer = self.pending_refreshes.lock().pop_front();
        match consumer {
            Some(consumer) => {
                consumer(result);
                true
            }
            None => false,
        }
    }
}

impl RequestManager for ScriptedRequestManager {
    fn trigger_refresh(&self, reason: RequestReason, consumer: UpdateConsumer) {
        self.refresh_reasons.lock().push(reason);
        let scripted = self.refresh_responses.lock().pop_front();
        match scripted {
            Some(result) => consumer(result),
            None => self.pending_refreshes.lock().push_back(consumer),
        }
    }

    fn load_more(&self, token: &StreamToken, consumer: UpdateConsumer) {
        self.loaded_tokens.lock().push(token.clone());
        let scripted = self.load_more_responses.lock().pop_front();
        consumer(scripted.unwrap_or_else(|| Err(RequestError::Failed("nothing scripted".into()))));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// A `SchedulerApi` with a fixed answer that counts its callbacks.
pub struct FixedScheduler {
    behavior: Mutex<RequestBehavior>,
    states: Mutex<Vec<SessionState>>,
    new_content: AtomicUsize,
    errors: AtomicUsize,
}

impl FixedScheduler {
    pub fn new(behavior: RequestBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            states: Mutex::new(Vec::new()),
            new_content: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        })
    }

    pub fn set_behavior(&self, behavior: RequestBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.states.lock().clone()
    }

    pub fn new_content(&self) -> usize {
        self.new_content.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

impl SchedulerApi for FixedScheduler {
    fn should_session_request_data(&self, state: &SessionState) -> RequestBehavior {
        self.states.lock().push(*state);
        *self.behavior.lock()
    }

    fn on_receive_new_content(&self, _content_creation_time: i64) {
        self.new_content.fetch_add(1, Ordering::SeqCst);
    }

    fn on_request_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

/// A manager wired to in-memory collaborators.
pub struct Harness {
    pub manager: FeedSessionManager,
    pub store: MemoryStore,
    pub requests: Arc<ScriptedRequestManager>,
    pub scheduler: Arc<FixedScheduler>,
    pub clock: Arc<FakeClock>,
}

impl Harness {
    /// Start with an empty store and no automatic requests, then wait for
    /// initialization.
    pub fn start() -> Result<Self> {
        let harness = Self::build(
            MemoryStore::new(),
            Arc::new(FakeClock::new(T0)),
            RequestBehavior::NoRequest,
            ManagerConfig::default(),
        )?;
        harness.idle()?;
        Ok(harness)
    }

    /// Build without waiting for initialization.
    pub fn build(
        store: MemoryStore,
        clock: Arc<FakeClock>,
        behavior: RequestBehavior,
        config: ManagerConfig,
    ) -> Result<Self> {
        init_tracing();
        let requests = ScriptedRequestManager::new();
        let scheduler = FixedScheduler::new(behavior);
        let manager = FeedSessionManager::builder()
            .with_store(Arc::new(store.clone()))
            .with_request_manager(requests.clone())
            .with_scheduler(scheduler.clone())
            .with_clock(clock.clone())
            .with_config(config)
            .build()?;
        Ok(Self {
            manager,
            store,
            requests,
            scheduler,
            clock,
        })
    }

    pub fn idle(&self) -> Result<()> {
        anyhow::ensure!(
            self.manager.wait_until_idle(IDLE),
            "task queue did not go idle: {:?}",
            self.manager.stats().queue
        );
        Ok(())
    }

    /// Create a session for a new observer and return its token.
    pub fn new_session(&self) -> Result<(String, Arc<RecordingObserver>)> {
        let observer = RecordingObserver::new();
        self.manager.get_new_session(observer.clone());
        self.idle()?;
        let token = observer
            .token()
            .ok_or_else(|| anyhow::anyhow!("observer was never populated"))?;
        Ok((token, observer))
    }

    /// Commit `operations` through an update consumer and wait for it.
    pub fn commit(&self, context: MutationContext, operations: Vec<StreamDataOperation>) -> Result<()> {
        self.manager.get_update_consumer(context).accept(Ok(operations));
        self.idle()
    }
}

/// Manager config from a TOML snippet, the way hosts load it.
pub fn config_from_toml(toml: &str) -> Result<ManagerConfig> {
    let file = FeedlineConfig::from_toml(toml)?;
    Ok(ManagerConfig::from_config(&file))
}
