//! Designated main-thread assertions.

use std::thread::{self, ThreadId};

/// Records the designated main thread and asserts entry points run on it.
///
/// Observer-facing entry points are confined to one thread so observers see
/// notifications in a deterministic order. Violations are programmer errors
/// and panic.
#[derive(Debug, Clone, Copy)]
pub struct ThreadChecker {
    main: ThreadId,
}

impl ThreadChecker {
    /// Treat the calling thread as the main thread.
    pub fn current() -> Self {
        Self::new(thread::current().id())
    }

    pub fn new(main: ThreadId) -> Self {
        Self { main }
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main
    }

    /// Panic unless called from the main thread.
    pub fn check_main_thread(&self, operation: &str) {
        assert!(
            self.is_main_thread(),
            "{operation} must be called on the main thread (called from {:?})",
            thread::current().name().unwrap_or("<unnamed>")
        );
    }
}
