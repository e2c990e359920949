//! Single-worker priority task queue.
//!
//! Every mutating operation of the session manager runs as a task on one
//! worker thread, so no two structural updates ever interleave. The queue
//! adds two gates on top of plain FIFO execution:
//!
//! - nothing but the initialization task runs before initialization
//!   finishes
//! - after a [`TaskType::HeadInvalidate`] task, ordinary work waits until
//!   a [`TaskType::HeadReset`] task completes
//!
//! While either gate is closed, or while ordinary work is already waiting,
//! the queue is *delayed*: user-facing and background tasks are parked and
//! later drained one at a time, user-facing first. Head tasks never wait.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use feedline_types::{HasTaskQueueConfig, config_defaults};
use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

/// Task class, in descending priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Rebuilds $HEAD. Runs immediately and reopens the queue when done.
    HeadReset,
    /// Invalidates $HEAD. Runs immediately and closes the queue until the
    /// next head reset.
    HeadInvalidate,
    UserFacing,
    Background,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HeadReset => "head_reset",
            Self::HeadInvalidate => "head_invalidate",
            Self::UserFacing => "user_facing",
            Self::Background => "background",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for the queue.
#[derive(Debug, Clone)]
pub struct TaskQueueSettings {
    /// Longest wait on a head reset before parked work is released anyway.
    pub starvation_timeout: Duration,
    /// Interval between starvation checks.
    pub starvation_check_interval: Duration,
}

impl TaskQueueSettings {
    pub fn from_config<C: HasTaskQueueConfig>(config: &C) -> Self {
        Self {
            starvation_timeout: config.starvation_timeout(),
            starvation_check_interval: config.starvation_check_interval(),
        }
    }
}

impl Default for TaskQueueSettings {
    fn default() -> Self {
        Self {
            starvation_timeout: config_defaults::starvation_timeout(),
            starvation_check_interval: config_defaults::starvation_check_interval(),
        }
    }
}

/// Queue statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueueStats {
    pub initialized: bool,
    pub waiting_for_head_reset: bool,
    pub user_queued: usize,
    pub background_queued: usize,
    /// Tasks handed to the worker and not yet finished.
    pub in_flight: usize,
    pub executed: u64,
    pub timed_out: u64,
    pub starvation_releases: u64,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Initialization,
    Typed(TaskType),
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Initialization => f.write_str("initialization"),
            Slot::Typed(task_type) => task_type.fmt(f),
        }
    }
}

struct Task {
    name: &'static str,
    slot: Slot,
    body: Job,
    /// Present for tasks racing a timeout. Sending claims the task; a closed
    /// channel means the timeout already won.
    started: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct QueueState {
    initialized: bool,
    wait_for_head_reset: bool,
    head_reset_requested_at: Option<Instant>,
    starvation_check_running: bool,
    user_tasks: VecDeque<Task>,
    background_tasks: VecDeque<Task>,
    in_flight: usize,
    executed: u64,
    timed_out: u64,
    starvation_releases: u64,
}

impl QueueState {
    fn has_backlog(&self) -> bool {
        !self.user_tasks.is_empty() || !self.background_tasks.is_empty()
    }

    fn is_delayed(&self) -> bool {
        !self.initialized || self.wait_for_head_reset || self.has_backlog()
    }

    fn pop_next(&mut self) -> Option<Task> {
        if !self.initialized || self.wait_for_head_reset {
            return None;
        }
        self.user_tasks
            .pop_front()
            .or_else(|| self.background_tasks.pop_front())
    }

    fn is_idle(&self) -> bool {
        self.in_flight == 0 && !self.has_backlog()
    }

    fn release_head_reset(&mut self) {
        self.wait_for_head_reset = false;
        self.head_reset_requested_at = None;
    }
}

struct Shared {
    state: Mutex<QueueState>,
    idle: Condvar,
    worker: mpsc::Sender<Job>,
    runtime: Option<Handle>,
    settings: TaskQueueSettings,
}

impl Shared {
    /// Hand a task to the worker. Caller holds the state lock.
    fn dispatch(self: &Arc<Self>, state: &mut QueueState, task: Task) {
        state.in_flight += 1;
        let shared = Arc::clone(self);
        let name = task.name;
        if self.worker.send(Box::new(move || shared.run(task))).is_err() {
            state.in_flight -= 1;
            error!(task = name, "Task queue worker is gone, dropping task");
        }
    }

    fn submit(self: &Arc<Self>, task: Task) {
        let mut state = self.state.lock();
        let task_type = match task.slot {
            Slot::Initialization => {
                self.dispatch(&mut state, task);
                return;
            }
            Slot::Typed(task_type) => task_type,
        };

        match task_type {
            TaskType::HeadInvalidate => {
                state.wait_for_head_reset = true;
                state.head_reset_requested_at.get_or_insert_with(Instant::now);
                // Work parked before the gate closed waits on it too.
                if state.has_backlog() {
                    self.ensure_starvation_check(&mut state);
                }
                self.dispatch(&mut state, task);
            }
            TaskType::HeadReset => self.dispatch(&mut state, task),
            TaskType::UserFacing | TaskType::Background => {
                if !state.is_delayed() {
                    self.dispatch(&mut state, task);
                    return;
                }
                trace!(
                    task = task.name,
                    task_type = %task_type,
                    initialized = state.initialized,
                    waiting_for_head_reset = state.wait_for_head_reset,
                    "Queue delayed, parking task"
                );
                if task_type == TaskType::UserFacing {
                    state.user_tasks.push_back(task);
                } else {
                    state.background_tasks.push_back(task);
                }
                self.ensure_starvation_check(&mut state);
            }
        }
    }

    fn run(self: &Arc<Self>, task: Task) {
        let Task {
            name,
            slot,
            body,
            started,
        } = task;

        if let Some(started) = started
            && started.send(()).is_err()
        {
            debug!(task = name, "Task timed out before starting, skipping");
            self.finish(slot, false);
            return;
        }

        trace!(task = name, task_type = %slot, "Task started");
        let begin = Instant::now();
        if catch_unwind(AssertUnwindSafe(body)).is_err() {
            error!(task = name, task_type = %slot, "Task panicked");
        }
        debug!(
            task = name,
            task_type = %slot,
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "Task finished"
        );
        self.finish(slot, true);
    }

    fn finish(self: &Arc<Self>, slot: Slot, ran: bool) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        if ran {
            state.executed += 1;
        }

        match slot {
            Slot::Initialization => {
                state.initialized = true;
                info!(
                    waiting_for_head_reset = state.wait_for_head_reset,
                    queued = state.user_tasks.len() + state.background_tasks.len(),
                    "Task queue initialized"
                );
            }
            Slot::Typed(TaskType::HeadReset) if ran => {
                if state.wait_for_head_reset {
                    debug!("Head reset complete, reopening queue");
                }
                state.release_head_reset();
            }
            Slot::Typed(_) => {}
        }

        if let Some(next) = state.pop_next() {
            self.dispatch(&mut state, next);
        }
        if state.is_idle() {
            self.idle.notify_all();
        }
    }

    /// Reopen the queue after a head invalidation and start draining.
    /// Caller holds the state lock.
    fn release_and_drain(self: &Arc<Self>, state: &mut QueueState) {
        state.release_head_reset();
        // With work in flight, its completion drains the next task.
        if state.in_flight == 0
            && let Some(next) = state.pop_next()
        {
            self.dispatch(state, next);
        }
    }

    fn ensure_starvation_check(self: &Arc<Self>, state: &mut QueueState) {
        if !state.wait_for_head_reset || state.starvation_check_running {
            return;
        }
        let Some(runtime) = &self.runtime else {
            return;
        };
        state.starvation_check_running = true;

        let shared: Weak<Shared> = Arc::downgrade(self);
        let interval = self.settings.starvation_check_interval;
        runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if !shared.check_starvation() {
                    break;
                }
            }
        });
    }

    /// Returns whether the check should keep running.
    fn check_starvation(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock();
        if !state.wait_for_head_reset || !state.has_backlog() {
            state.starvation_check_running = false;
            return false;
        }

        let waited = state
            .head_reset_requested_at
            .map(|at| at.elapsed())
            .unwrap_or_default();
        if waited < self.settings.starvation_timeout {
            return true;
        }

        warn!(
            waited_ms = waited.as_millis() as u64,
            user_queued = state.user_tasks.len(),
            background_queued = state.background_tasks.len(),
            "Head reset did not arrive in time, releasing queued tasks"
        );
        state.starvation_releases += 1;
        state.starvation_check_running = false;
        self.release_and_drain(&mut state);
        false
    }
}

/// Single-worker priority task queue.
///
/// Cloning yields another handle to the same queue. The worker thread exits
/// once every handle is dropped and no work remains.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl TaskQueue {
    /// Create a queue. Timeouts and starvation checks use the current tokio
    /// runtime, if there is one.
    pub fn new(settings: TaskQueueSettings) -> Self {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            debug!("No tokio runtime, task timeouts and starvation checks disabled");
        }
        Self::build(settings, runtime)
    }

    /// Create a queue whose timers run on `runtime`.
    pub fn with_runtime(settings: TaskQueueSettings, runtime: Handle) -> Self {
        Self::build(settings, Some(runtime))
    }

    fn build(settings: TaskQueueSettings, runtime: Option<Handle>) -> Self {
        let (worker, jobs) = mpsc::channel::<Job>();
        std::thread::spawn(move || {
            while let Ok(job) = jobs.recv() {
                job();
            }
            trace!("Task queue worker exiting");
        });

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                idle: Condvar::new(),
                worker,
                runtime,
                settings,
            }),
        }
    }

    /// Run the one-time initialization task. Must be the first submission.
    pub fn execute_initialization(&self, body: impl FnOnce() + Send + 'static) {
        if self.shared.state.lock().initialized {
            warn!("Task queue already initialized, running initialization again");
        }
        self.shared.submit(Task {
            name: "initialize",
            slot: Slot::Initialization,
            body: Box::new(body),
            started: None,
        });
    }

    /// Run `body` on the worker, now or once the queue reopens.
    pub fn execute(
        &self,
        name: &'static str,
        task_type: TaskType,
        body: impl FnOnce() + Send + 'static,
    ) {
        self.shared.submit(Task {
            name,
            slot: Slot::Typed(task_type),
            body: Box::new(body),
            started: None,
        });
    }

    /// Like [`TaskQueue::execute`], but if the task has not started within
    /// `timeout`, `on_timeout` runs instead and the task is skipped. Exactly
    /// one of the two runs. Work already in progress is never interrupted.
    pub fn execute_with_timeout(
        &self,
        name: &'static str,
        task_type: TaskType,
        body: impl FnOnce() + Send + 'static,
        timeout: Duration,
        on_timeout: impl FnOnce() + Send + 'static,
    ) {
        let Some(runtime) = &self.shared.runtime else {
            warn!(task = name, "No runtime for task timeout, running without one");
            self.execute(name, task_type, body);
            return;
        };

        let (started_tx, mut started_rx) = oneshot::channel::<()>();
        let shared = Arc::downgrade(&self.shared);
        runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    started_rx.close();
                    if started_rx.try_recv().is_ok() {
                        // Claimed by the worker right at the deadline.
                        return;
                    }
                    warn!(
                        task = name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Task did not start before its deadline"
                    );
                    if let Some(shared) = shared.upgrade() {
                        shared.state.lock().timed_out += 1;
                    }
                    on_timeout();
                }
                _ = &mut started_rx => {}
            }
        });

        self.shared.submit(Task {
            name,
            slot: Slot::Typed(task_type),
            body: Box::new(body),
            started: Some(started_tx),
        });
    }

    /// Whether ordinary tasks submitted now would be parked.
    pub fn is_delayed(&self) -> bool {
        self.shared.state.lock().is_delayed()
    }

    /// Whether ordinary tasks are parked.
    pub fn has_backlog(&self) -> bool {
        self.shared.state.lock().has_backlog()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.state.lock().initialized
    }

    pub fn is_waiting_for_head_reset(&self) -> bool {
        self.shared.state.lock().wait_for_head_reset
    }

    /// Reopen the queue without a head reset, e.g. when the refresh that
    /// would have produced it failed.
    pub fn release_head_reset(&self) {
        let mut state = self.shared.state.lock();
        if !state.wait_for_head_reset {
            return;
        }
        info!("Releasing head reset wait");
        self.shared.release_and_drain(&mut state);
    }

    /// Drop all parked tasks and reopen the head reset gate.
    ///
    /// Returns the number of tasks dropped. Tasks already handed to the
    /// worker still run.
    pub fn reset(&self) -> usize {
        let mut state = self.shared.state.lock();
        let dropped = state.user_tasks.len() + state.background_tasks.len();
        state.user_tasks.clear();
        state.background_tasks.clear();
        state.release_head_reset();
        if dropped > 0 {
            warn!(dropped, "Task queue reset dropped parked tasks");
        }
        if state.is_idle() {
            self.shared.idle.notify_all();
        }
        dropped
    }

    /// Block until no task is parked or in flight, or `timeout` elapses.
    ///
    /// Returns `true` if the queue went idle. Must not be called from a task.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        let result = self
            .shared
            .idle
            .wait_while_for(&mut state, |state| !state.is_idle(), timeout);
        !result.timed_out()
    }

    pub fn stats(&self) -> TaskQueueStats {
        let state = self.shared.state.lock();
        TaskQueueStats {
            initialized: state.initialized,
            waiting_for_head_reset: state.wait_for_head_reset,
            user_queued: state.user_tasks.len(),
            background_queued: state.background_tasks.len(),
            in_flight: state.in_flight,
            executed: state.executed,
            timed_out: state.timed_out,
            starvation_releases: state.starvation_releases,
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("stats", &self.stats())
            .finish()
    }
}
