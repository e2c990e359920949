//! Configuration traits for decoupled config passing between crates.
//!
//! Components depend on the capability they need (session lifetime, queue
//! starvation limits) rather than on the full configuration file model.

use std::time::Duration;

/// Base trait for all configuration types.
///
/// Implementations should be cheaply cloneable and thread-safe.
pub trait ConfigProvider: Clone + Send + Sync + 'static {}

/// Session lifetime configuration.
pub trait HasSessionConfig: ConfigProvider {
    /// How long a non-head session survives without being accessed.
    fn session_lifetime(&self) -> Duration;
}

/// Task queue configuration.
pub trait HasTaskQueueConfig: ConfigProvider {
    /// How long ordinary tasks may wait on a pending head reset before the
    /// queue releases the gate on its own.
    fn starvation_timeout(&self) -> Duration;

    /// Interval between starvation checks.
    fn starvation_check_interval(&self) -> Duration {
        Duration::from_millis(defaults::STARVATION_CHECK_MS)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Default values
// ─────────────────────────────────────────────────────────────────────────────

pub mod defaults {
    use std::time::Duration;

    /// One hour.
    pub const SESSION_LIFETIME_MS: u64 = 3_600_000;
    pub const STARVATION_TIMEOUT_MS: u64 = 15_000;
    pub const STARVATION_CHECK_MS: u64 = 6_000;

    pub fn session_lifetime() -> Duration {
        Duration::from_millis(SESSION_LIFETIME_MS)
    }

    pub fn starvation_timeout() -> Duration {
        Duration::from_millis(STARVATION_TIMEOUT_MS)
    }

    pub fn starvation_check_interval() -> Duration {
        Duration::from_millis(STARVATION_CHECK_MS)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simple wrapper types for standalone config passing
// ─────────────────────────────────────────────────────────────────────────────

/// Standalone session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfigProvider {
    pub session_lifetime: Duration,
}

impl Default for SessionConfigProvider {
    fn default() -> Self {
        Self {
            session_lifetime: defaults::session_lifetime(),
        }
    }
}

impl ConfigProvider for SessionConfigProvider {}

impl HasSessionConfig for SessionConfigProvider {
    fn session_lifetime(&self) -> Duration {
        self.session_lifetime
    }
}

/// Standalone task queue configuration.
#[derive(Debug, Clone)]
pub struct TaskQueueConfigProvider {
    pub starvation_timeout: Duration,
    pub starvation_check_interval: Duration,
}

impl Default for TaskQueueConfigProvider {
    fn default() -> Self {
        Self {
            starvation_timeout: defaults::starvation_timeout(),
            starvation_check_interval: defaults::starvation_check_interval(),
        }
    }
}

impl ConfigProvider for TaskQueueConfigProvider {}

impl HasTaskQueueConfig for TaskQueueConfigProvider {
    fn starvation_timeout(&self) -> Duration {
        self.starvation_timeout
    }

    fn starvation_check_interval(&self) -> Duration {
        self.starvation_check_interval
    }
}
