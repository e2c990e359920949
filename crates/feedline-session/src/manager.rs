//! Feed session manager.
//!
//! [`FeedSessionManager`] owns the $HEAD session, every derived session,
//! the shared-state cache and the content cache. Every mutation runs as a
//! task on its [`TaskQueue`]; the main-thread entry points only check the
//! caller's thread, read in-memory state and enqueue work.
//!
//! Lock order: the state lock is never held while a session lock is
//! taken. Session handles are cloned out under the state lock and locked
//! afterwards.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use feedline_types::{
    Clock, ContentGcTask, ContentMutation, HEAD_TOKEN, HasSessionConfig, HasTaskQueueConfig,
    ModelProvider, MutationContext, PayloadWithId, ReachableContent, RequestBehavior,
    RequestManager, RequestReason, SESSIONS_CONTENT_ID, SchedulerApi, SessionState, Store,
    StreamPayload, StreamSession, StreamSessions, StreamSharedState, StreamToken, SystemClock,
    config_defaults,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

use crate::committer::CommitterTask;
use crate::content_cache::ContentCache;
use crate::error::{Result, SessionError};
use crate::factory::SessionFactory;
use crate::session::{Session, SessionKind, is_session_alive};
use crate::task_queue::{TaskQueue, TaskQueueSettings, TaskQueueStats, TaskType};
use crate::thread::ThreadChecker;

pub(crate) type SessionHandle = Arc<Mutex<Session>>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and stats
// ─────────────────────────────────────────────────────────────────────────────

/// Manager tunables.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Idle time after which a derived session expires.
    pub session_lifetime: Duration,
    pub task_queue: TaskQueueSettings,
}

impl ManagerConfig {
    pub fn from_config<C: HasSessionConfig + HasTaskQueueConfig>(config: &C) -> Self {
        Self {
            session_lifetime: config.session_lifetime(),
            task_queue: TaskQueueSettings::from_config(config),
        }
    }

    /// Load tunables from the user and project config files for
    /// `project_dir`.
    pub fn discover(project_dir: &Path) -> Result<Self> {
        Self::from_files(&feedline_config::config_layers(project_dir))
    }

    /// Load tunables from `layers`, lowest precedence first. Missing files
    /// are skipped; a file that does not parse is an error.
    pub fn from_files<P: AsRef<Path>>(layers: &[P]) -> Result<Self> {
        let file = feedline_config::load_layers(layers)
            .map_err(|e| SessionError::Config(e.to_string()))?;
        Ok(Self::from_config(&file))
    }

    pub fn with_session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = lifetime;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            session_lifetime: config_defaults::session_lifetime(),
            task_queue: TaskQueueSettings::default(),
        }
    }
}

/// Manager statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    /// Tracked sessions, $HEAD included.
    pub sessions: usize,
    pub bound_sessions: usize,
    pub unbound_sessions: usize,
    pub shared_states: usize,
    /// Payloads held by the content cache from the latest commit.
    pub cached_payloads: usize,
    pub commits: u64,
    pub head_resets: u64,
    /// Time of the latest successful commit, 0 if none.
    pub last_refresh_time: i64,
    pub queue: TaskQueueStats,
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct ManagerState {
    pub(crate) sessions: HashMap<String, SessionHandle>,
    pub(crate) shared_state_cache: HashMap<String, StreamSharedState>,
    pub(crate) content_cache: ContentCache,
    pub(crate) last_refresh_time: i64,
    pub(crate) outstanding_request: bool,
    pub(crate) commits: u64,
    pub(crate) head_resets: u64,
}

pub(crate) struct ManagerInner {
    pub(crate) state: Mutex<ManagerState>,
    pub(crate) store: Arc<dyn Store>,
    request_manager: Arc<dyn RequestManager>,
    pub(crate) scheduler: Arc<dyn SchedulerApi>,
    pub(crate) task_queue: TaskQueue,
    factory: SessionFactory,
    clock: Arc<dyn Clock>,
    thread_checker: ThreadChecker,
    config: ManagerConfig,
}

impl ManagerInner {
    pub(crate) fn now(&self) -> i64 {
        self.clock.current_time_millis()
    }

    pub(crate) fn session_handle(&self, token: &str) -> Option<SessionHandle> {
        self.state.lock().sessions.get(token).cloned()
    }

    /// Sessions a commit applies to: $HEAD alone after a clear, else all.
    pub(crate) fn sessions_to_update(&self, head_cleared: bool) -> Vec<SessionHandle> {
        let state = self.state.lock();
        if head_cleared {
            state.sessions.get(HEAD_TOKEN).cloned().into_iter().collect()
        } else {
            state.sessions.values().cloned().collect()
        }
    }

    pub(crate) fn update_consumer(
        self: &Arc<Self>,
        context: MutationContext,
        timeout: Option<Duration>,
    ) -> CommitterTask {
        CommitterTask::new(Arc::clone(self), context, timeout)
    }

    fn session_state(&self) -> SessionState {
        let has_content = self
            .session_handle(HEAD_TOKEN)
            .is_some_and(|head| !head.lock().content_in_session().is_empty());
        let now = self.now();
        let state = self.state.lock();
        SessionState {
            has_content,
            content_age_ms: now.saturating_sub(state.last_refresh_time),
            has_outstanding_request: state.outstanding_request,
        }
    }

    // ── initialization ──────────────────────────────────────────────────────

    fn initialize(self: &Arc<Self>) {
        info!("Initializing feed session manager");
        match self.store.get_shared_states() {
            Ok(shared_states) => {
                let mut state = self.state.lock();
                for shared_state in shared_states {
                    state
                        .shared_state_cache
                        .insert(shared_state.content_id.clone(), shared_state);
                }
                debug!(shared_states = state.shared_state_cache.len(), "Shared states loaded");
            }
            Err(e) => error!(error = %e, "Failed to load shared states"),
        }

        let mut head = self.factory.create_head_session();
        match self.store.get_stream_structures(head.stream_session()) {
            Ok(structures) => head.initialize(&structures),
            Err(e) => error!(error = %e, "Failed to load $HEAD journal"),
        }
        let head_has_content = head.has_content();
        self.state.lock().sessions.insert(
            HEAD_TOKEN.to_string(),
            Arc::new(Mutex::new(Session::Head(head))),
        );

        if !head_has_content {
            let behavior = self
                .scheduler
                .should_session_request_data(&self.session_state());
            if behavior == RequestBehavior::RequestWithWait {
                info!("$HEAD is empty, refreshing before serving sessions");
                self.trigger_refresh(None, RequestReason::OpenWithoutContent);
            }
        }

        self.initialize_persisted_sessions();
    }

    fn initialize_persisted_sessions(self: &Arc<Self>) {
        let persisted = match self.load_session_index() {
            Ok(persisted) => persisted,
            Err(e) => {
                error!(error = %e, "Failed to load session index");
                Vec::new()
            }
        };

        let now = self.now();
        let mut restored = 0usize;
        let mut expired = 0usize;
        for stream_session in persisted {
            if stream_session.is_head() {
                continue;
            }
            if !is_session_alive(&stream_session, now, self.config.session_lifetime) {
                debug!(session_id = %stream_session.stream_token, "Persisted session expired");
                expired += 1;
                continue;
            }

            let token = stream_session.stream_token.clone();
            let handle = {
                let mut state = self.state.lock();
                if state.sessions.contains_key(&token) {
                    continue;
                }
                let session = self.factory.create_unbound_session(stream_session);
                let handle: SessionHandle = Arc::new(Mutex::new(Session::Unbound(session)));
                state.sessions.insert(token, Arc::clone(&handle));
                handle
            };
            restored += 1;

            let inner = Arc::clone(self);
            self.task_queue
                .execute("populate_unbound_session", TaskType::Background, move || {
                    inner.populate_unbound_session(&handle)
                });
        }
        info!(restored, expired, "Persisted sessions loaded");

        let gc = self.content_gc();
        self.task_queue
            .execute("content_gc", TaskType::Background, gc);
        let inner = Arc::clone(self);
        self.task_queue
            .execute("cleanup_session_journals", TaskType::Background, move || {
                inner.cleanup_session_journals()
            });
    }

    fn load_session_index(&self) -> Result<Vec<StreamSession>> {
        let payloads = self.store.get_payloads(&[SESSIONS_CONTENT_ID.to_string()])?;
        Ok(payloads
            .iter()
            .filter_map(|payload| payload.payload.as_sessions())
            .flat_map(|index| index.sessions.iter().cloned())
            .collect())
    }

    fn populate_unbound_session(&self, handle: &SessionHandle) {
        let stream_session = handle.lock().stream_session().clone();
        let structures = match self.store.get_stream_structures(&stream_session) {
            Ok(structures) => structures,
            Err(e) => {
                error!(session_id = %stream_session.stream_token, error = %e, "Failed to load session journal");
                return;
            }
        };
        match &mut *handle.lock() {
            Session::Unbound(session) => {
                session.populate(&structures);
                debug!(
                    session_id = %stream_session.stream_token,
                    content = session.content_in_session().len(),
                    "Unbound session populated"
                );
            }
            Session::Head(_) | Session::Bound(_) => {
                debug!(session_id = %stream_session.stream_token, "Session already bound, skipping population");
            }
        }
    }

    // ── sessions ────────────────────────────────────────────────────────────

    fn create_session(&self, model_provider: Arc<dyn ModelProvider>) {
        let stream_session = match self.store.create_new_session() {
            Ok(stream_session) => stream_session,
            Err(e) => {
                error!(error = %e, "Failed to create session");
                return;
            }
        };
        let head_structures = match self
            .store
            .get_stream_structures(&self.store.get_head_session())
        {
            Ok(structures) => structures,
            Err(e) => {
                error!(session_id = %stream_session.stream_token, error = %e, "Failed to read $HEAD journal");
                return;
            }
        };

        let cached_bindings = !self.state.lock().content_cache.is_empty();
        let mut session = self.factory.create_session(stream_session, model_provider);
        session.update_access_time(self.now());
        session.populate(&head_structures, cached_bindings);

        let token = session.stream_session().stream_token.clone();
        info!(
            session_id = %token,
            content = session.content_in_session().len(),
            cached_bindings,
            "Session created"
        );
        self.state
            .lock()
            .sessions
            .insert(token, Arc::new(Mutex::new(Session::Bound(session))));
        self.save_session_index();
    }

    fn restore_session(&self, token: &str, model_provider: Arc<dyn ModelProvider>) {
        let Some(stream_session) = self
            .session_handle(token)
            .map(|handle| handle.lock().stream_session().clone())
        else {
            warn!(session_id = %token, "Session removed before it could be restored");
            model_provider.invalidate();
            return;
        };
        let structures = match self.store.get_stream_structures(&stream_session) {
            Ok(structures) => structures,
            Err(e) => {
                error!(session_id = %token, error = %e, "Failed to read session journal");
                return;
            }
        };

        let mut session = self.factory.create_session(stream_session, model_provider);
        session.update_access_time(self.now());
        session.populate(&structures, false);
        info!(
            session_id = %token,
            content = session.content_in_session().len(),
            "Session restored"
        );
        self.state
            .lock()
            .sessions
            .insert(token.to_string(), Arc::new(Mutex::new(Session::Bound(session))));
        self.save_session_index();
    }

    fn invalidate_observer(&self, token: &str) {
        let provider = self
            .session_handle(token)
            .and_then(|handle| handle.lock().model_provider().cloned());
        if let Some(provider) = provider {
            debug!(session_id = %token, "Invalidating observer");
            provider.invalidate();
        }
    }

    /// Persist the session index, $HEAD first.
    pub(crate) fn save_session_index(&self) {
        let handles: Vec<SessionHandle> = self.state.lock().sessions.values().cloned().collect();
        let mut sessions: Vec<StreamSession> = handles
            .iter()
            .map(|handle| handle.lock().stream_session().clone())
            .collect();
        sessions.sort_by_key(|session| !session.is_head());

        let count = sessions.len();
        let mut mutation = ContentMutation::new();
        mutation.add(
            SESSIONS_CONTENT_ID,
            StreamPayload::Sessions(StreamSessions { sessions }),
        );
        match self.store.commit_content(mutation) {
            Ok(()) => trace!(sessions = count, "Session index saved"),
            Err(e) => error!(error = %e, "Failed to save session index"),
        }
    }

    /// Clear $HEAD and drop the derived sessions the reset applies to.
    ///
    /// A bound session is dropped when there is no originating session,
    /// when its observer has no session token yet, or when the observer's
    /// token is the originating one. Unbound sessions are kept.
    pub(crate) fn reset_head(&self, origin: Option<&str>) {
        let candidates: Vec<(String, SessionHandle)> = self
            .state
            .lock()
            .sessions
            .iter()
            .map(|(token, handle)| (token.clone(), Arc::clone(handle)))
            .collect();

        let mut removed = Vec::new();
        for (token, handle) in candidates {
            let (provider, stream_session) = {
                let session = handle.lock();
                match &*session {
                    Session::Bound(bound) => (
                        Arc::clone(bound.model_provider()),
                        bound.stream_session().clone(),
                    ),
                    Session::Head(_) | Session::Unbound(_) => continue,
                }
            };

            let observer_token = provider.session_token();
            let invalidate = match (origin, observer_token.as_deref()) {
                (None, _) | (_, None) | (_, Some("")) => true,
                (Some(origin), Some(current)) => origin == current,
            };
            if !invalidate {
                trace!(session_id = %token, "Observer not affected by head reset");
                continue;
            }

            provider.invalidate();
            if let Err(e) = self.store.remove_session(&stream_session) {
                error!(session_id = %token, error = %e, "Failed to remove session journal");
            }
            removed.push(token);
        }

        {
            let mut state = self.state.lock();
            for token in &removed {
                state.sessions.remove(token);
            }
            state.head_resets += 1;
        }

        if let Err(e) = self.store.clear_head() {
            error!(error = %e, "Failed to clear $HEAD journal");
        }
        if let Some(handle) = self.session_handle(HEAD_TOKEN)
            && let Session::Head(head) = &mut *handle.lock()
        {
            head.reset();
        }

        info!(removed = removed.len(), origin = ?origin, "$HEAD reset");
        self.save_session_index();
    }

    fn trigger_refresh(self: &Arc<Self>, session_token: Option<String>, reason: RequestReason) {
        let inner = Arc::clone(self);
        self.task_queue
            .execute("trigger_refresh", TaskType::HeadInvalidate, move || {
                let mut context = MutationContext::new().with_reason(reason);
                if let Some(token) = &session_token {
                    inner.invalidate_observer(token);
                    context = context.with_requesting_session(token.clone());
                }
                inner.state.lock().outstanding_request = true;
                debug!(?reason, session_id = ?session_token, "Requesting refresh");
                let consumer = inner.update_consumer(context, None).into_consumer();
                inner.request_manager.trigger_refresh(reason, consumer);
            });
    }

    // ── garbage collection ─────────────────────────────────────────────────

    fn reachable_content(&self) -> HashSet<String> {
        let handles: Vec<SessionHandle> = self.state.lock().sessions.values().cloned().collect();
        let mut reachable = HashSet::new();
        for handle in handles {
            reachable.extend(handle.lock().content_in_session().iter().cloned());
        }
        reachable
    }

    fn content_gc(self: &Arc<Self>) -> ContentGcTask {
        let inner = Arc::clone(self);
        let reachable: ReachableContent = Box::new(move || inner.reachable_content());
        self.store
            .trigger_content_gc(HashSet::from([SESSIONS_CONTENT_ID.to_string()]), reachable)
    }

    fn cleanup_session_journals(&self) {
        let stored = match self.store.get_all_sessions() {
            Ok(stored) => stored,
            Err(e) => {
                error!(error = %e, "Failed to list session journals");
                return;
            }
        };
        let tracked: HashSet<String> = self.state.lock().sessions.keys().cloned().collect();

        let mut removed = 0usize;
        for session in stored
            .iter()
            .filter(|session| !session.is_head() && !tracked.contains(&session.stream_token))
        {
            match self.store.remove_session(session) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(session_id = %session.stream_token, error = %e, "Failed to remove stale journal")
                }
            }
        }
        if removed > 0 {
            info!(removed, "Stale session journals removed");
        } else {
            debug!("No stale session journals");
        }
    }

    fn collect_garbage(self: &Arc<Self>) {
        let now = self.now();
        let handles: Vec<(String, SessionHandle)> = self
            .state
            .lock()
            .sessions
            .iter()
            .map(|(token, handle)| (token.clone(), Arc::clone(handle)))
            .collect();

        let mut expired = Vec::new();
        for (token, handle) in handles {
            let provider = {
                let session = handle.lock();
                if is_session_alive(session.stream_session(), now, self.config.session_lifetime) {
                    continue;
                }
                session.model_provider().cloned()
            };
            if let Some(provider) = provider {
                provider.invalidate();
            }
            expired.push(token);
        }

        {
            let mut state = self.state.lock();
            for token in &expired {
                state.sessions.remove(token);
            }
        }
        info!(expired = expired.len(), "Expired sessions dropped");

        self.save_session_index();
        self.cleanup_session_journals();
        let gc = self.content_gc();
        gc();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FeedSessionManager
// ─────────────────────────────────────────────────────────────────────────────

/// Coordinates sessions, caches and commits for one feed.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct FeedSessionManager {
    inner: Arc<ManagerInner>,
}

impl FeedSessionManager {
    pub fn builder() -> FeedSessionManagerBuilder {
        FeedSessionManagerBuilder::new()
    }

    /// Create a session for `model_provider` from the current $HEAD.
    ///
    /// The observer learns its session token through the populate
    /// mutation once the session is built. Main thread only.
    pub fn get_new_session(&self, model_provider: Arc<dyn ModelProvider>) {
        self.inner.thread_checker.check_main_thread("get_new_session");

        let state = self.inner.session_state();
        let behavior = self.inner.scheduler.should_session_request_data(&state);
        debug!(?behavior, has_content = state.has_content, "New session requested");

        if behavior == RequestBehavior::RequestWithWait {
            self.inner.trigger_refresh(None, reason_for(&state));
        }

        let inner = Arc::clone(&self.inner);
        self.inner
            .task_queue
            .execute("get_new_session", TaskType::UserFacing, move || {
                inner.create_session(model_provider)
            });

        if behavior == RequestBehavior::Request {
            self.inner.trigger_refresh(None, reason_for(&state));
        }
    }

    /// Attach `model_provider` to a tracked session.
    ///
    /// Returns false when the token is not tracked (e.g. it expired); the
    /// caller should fall back to [`FeedSessionManager::get_new_session`].
    /// Main thread only.
    pub fn get_existing_session(
        &self,
        session_token: &str,
        model_provider: Arc<dyn ModelProvider>,
    ) -> bool {
        self.inner
            .thread_checker
            .check_main_thread("get_existing_session");

        if session_token == HEAD_TOKEN {
            warn!("Observers cannot attach to $HEAD");
            return false;
        }
        if self.inner.session_handle(session_token).is_none() {
            info!(session_id = %session_token, "Session not found");
            return false;
        }

        self.inner.invalidate_observer(session_token);

        let inner = Arc::clone(&self.inner);
        let token = session_token.to_string();
        self.inner
            .task_queue
            .execute("get_existing_session", TaskType::UserFacing, move || {
                inner.restore_session(&token, model_provider)
            });
        true
    }

    /// Clear $HEAD and invalidate every bound observer. Main thread only.
    ///
    /// Ordinary work waits until the next head reset commit arrives or the
    /// starvation timeout passes.
    pub fn invalidate_head(&self) {
        self.inner.thread_checker.check_main_thread("invalidate_head");
        let inner = Arc::clone(&self.inner);
        self.inner
            .task_queue
            .execute("invalidate_head", TaskType::HeadInvalidate, move || {
                inner.reset_head(None)
            });
    }

    /// Request a full refresh, invalidating `session_token`'s observer as
    /// the request is issued. Main thread only.
    pub fn trigger_refresh(&self, session_token: Option<&str>) {
        self.inner.thread_checker.check_main_thread("trigger_refresh");
        self.inner.trigger_refresh(
            session_token.map(str::to_string),
            RequestReason::ManualRefresh,
        );
    }

    /// Load more content beyond `token` for a session. Main thread only.
    ///
    /// With a `timeout`, the resulting commit is skipped if it has not
    /// started by then.
    pub fn handle_token(&self, session_token: &str, token: StreamToken, timeout: Option<Duration>) {
        self.inner.thread_checker.check_main_thread("handle_token");

        match self.inner.session_handle(session_token) {
            Some(handle) => {
                handle.lock().update_access_time(self.inner.now());
                let inner = Arc::clone(&self.inner);
                self.inner
                    .task_queue
                    .execute("save_session_index", TaskType::Background, move || {
                        inner.save_session_index()
                    });
            }
            None => debug!(session_id = %session_token, "Continuation for untracked session"),
        }

        let context = MutationContext::new()
            .with_continuation_token(token.clone())
            .with_requesting_session(session_token);
        let consumer = self.inner.update_consumer(context, timeout).into_consumer();
        self.inner.request_manager.load_more(&token, consumer);
    }

    /// Deliver payloads for `content_ids`, content cache first.
    ///
    /// Missing ids are omitted. Result order is not tied to input order.
    pub fn get_stream_features(
        &self,
        content_ids: Vec<String>,
        consumer: impl FnOnce(Vec<PayloadWithId>) + Send + 'static,
    ) {
        let inner = Arc::clone(&self.inner);
        self.inner
            .task_queue
            .execute("get_stream_features", TaskType::UserFacing, move || {
                let mut found = Vec::with_capacity(content_ids.len());
                let mut misses = Vec::new();
                {
                    let state = inner.state.lock();
                    for content_id in content_ids {
                        match state.content_cache.get(&content_id) {
                            Some(payload) => {
                                found.push(PayloadWithId::new(content_id, payload.clone()))
                            }
                            None => misses.push(content_id),
                        }
                    }
                }
                trace!(hits = found.len(), misses = misses.len(), "Stream features lookup");

                if !misses.is_empty() {
                    match inner.store.get_payloads(&misses) {
                        Ok(payloads) => found.extend(payloads),
                        Err(e) => error!(error = %e, "Failed to read stream features"),
                    }
                }
                consumer(found);
            });
    }

    /// Cached shared state. Never reads the store. Main thread only.
    pub fn get_shared_state(&self, content_id: &str) -> Option<StreamSharedState> {
        self.inner.thread_checker.check_main_thread("get_shared_state");
        let state = self.inner.state.lock();
        let shared_state = state.shared_state_cache.get(content_id).cloned();
        if shared_state.is_none() {
            debug!(content_id = %content_id, "Shared state not found");
        }
        shared_state
    }

    /// The ingestion point for new data operations from any source.
    pub fn get_update_consumer(&self, context: MutationContext) -> CommitterTask {
        self.inner.update_consumer(context, None)
    }

    /// Drop expired sessions, then sweep journals and content.
    pub fn collect_garbage(&self) {
        let inner = Arc::clone(&self.inner);
        self.inner
            .task_queue
            .execute("collect_garbage", TaskType::Background, move || {
                inner.collect_garbage()
            });
    }

    /// Like [`FeedSessionManager::invalidate_head`], also emptying the
    /// shared-state and content caches.
    pub fn reset(&self) {
        let inner = Arc::clone(&self.inner);
        self.inner
            .task_queue
            .execute("reset", TaskType::HeadInvalidate, move || {
                {
                    let mut state = inner.state.lock();
                    state.shared_state_cache.clear();
                    state.content_cache.reset();
                }
                inner.reset_head(None);
            });
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.task_queue.is_initialized()
    }

    /// Block until no task is queued or running. Not for use from a task.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.inner.task_queue.wait_until_idle(timeout)
    }

    /// Tokens of all tracked sessions, sorted.
    pub fn session_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.inner.state.lock().sessions.keys().cloned().collect();
        tokens.sort();
        tokens
    }

    pub fn content_in_session(&self, session_token: &str) -> Result<HashSet<String>> {
        let handle = self
            .inner
            .session_handle(session_token)
            .ok_or_else(|| SessionError::NotFound(session_token.to_string()))?;
        let content = handle.lock().content_in_session().clone();
        Ok(content)
    }

    pub fn session_kind(&self, session_token: &str) -> Option<SessionKind> {
        self.inner
            .session_handle(session_token)
            .map(|handle| handle.lock().kind())
    }

    /// Tokens in the last persisted session index, in index order.
    pub fn persisted_session_tokens(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .load_session_index()?
            .into_iter()
            .map(|session| session.stream_token)
            .collect())
    }

    pub fn stats(&self) -> ManagerStats {
        let (handles, shared_states, cached_payloads, commits, head_resets, last_refresh_time) = {
            let state = self.inner.state.lock();
            (
                state.sessions.values().cloned().collect::<Vec<_>>(),
                state.shared_state_cache.len(),
                state.content_cache.len(),
                state.commits,
                state.head_resets,
                state.last_refresh_time,
            )
        };

        let mut bound_sessions = 0;
        let mut unbound_sessions = 0;
        for handle in &handles {
            match handle.lock().kind() {
                SessionKind::Bound => bound_sessions += 1,
                SessionKind::Unbound => unbound_sessions += 1,
                SessionKind::Head => {}
            }
        }

        ManagerStats {
            sessions: handles.len(),
            bound_sessions,
            unbound_sessions,
            shared_states,
            cached_payloads,
            commits,
            head_resets,
            last_refresh_time,
            queue: self.inner.task_queue.stats(),
        }
    }
}

impl std::fmt::Debug for FeedSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSessionManager")
            .field("stats", &self.stats())
            .finish()
    }
}

fn reason_for(state: &SessionState) -> RequestReason {
    if state.has_content {
        RequestReason::OpenWithContent
    } else {
        RequestReason::OpenWithoutContent
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`FeedSessionManager`].
///
/// Building submits the initialization task; nothing else runs on the
/// queue until it finishes.
pub struct FeedSessionManagerBuilder {
    store: Option<Arc<dyn Store>>,
    request_manager: Option<Arc<dyn RequestManager>>,
    scheduler: Option<Arc<dyn SchedulerApi>>,
    config: ManagerConfig,
    clock: Option<Arc<dyn Clock>>,
    main_thread: Option<ThreadId>,
    runtime: Option<Handle>,
}

impl FeedSessionManagerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            request_manager: None,
            scheduler: None,
            config: ManagerConfig::default(),
            clock: None,
            main_thread: None,
            runtime: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_request_manager(mut self, request_manager: Arc<dyn RequestManager>) -> Self {
        self.request_manager = Some(request_manager);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn SchedulerApi>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Designate the main thread. Defaults to the thread calling `build`.
    pub fn with_main_thread(mut self, thread: ThreadId) -> Self {
        self.main_thread = Some(thread);
        self
    }

    /// Run task timers on `runtime` instead of the ambient one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<FeedSessionManager> {
        let store = self
            .store
            .ok_or_else(|| SessionError::Config("store is required".to_string()))?;
        let request_manager = self
            .request_manager
            .ok_or_else(|| SessionError::Config("request manager is required".to_string()))?;
        let scheduler = self
            .scheduler
            .ok_or_else(|| SessionError::Config("scheduler is required".to_string()))?;

        let task_queue = match self.runtime {
            Some(runtime) => TaskQueue::with_runtime(self.config.task_queue.clone(), runtime),
            None => TaskQueue::new(self.config.task_queue.clone()),
        };
        let thread_checker = self
            .main_thread
            .map(ThreadChecker::new)
            .unwrap_or_else(ThreadChecker::current);

        let inner = Arc::new(ManagerInner {
            state: Mutex::new(ManagerState::default()),
            factory: SessionFactory::new(Arc::clone(&store)),
            store,
            request_manager,
            scheduler,
            task_queue,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            thread_checker,
            config: self.config,
        });

        let init = Arc::clone(&inner);
        inner
            .task_queue
            .execute_initialization(move || init.initialize());

        Ok(FeedSessionManager { inner })
    }
}

impl Default for FeedSessionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
