//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [session]
//! lifetime_ms = 3600000
//!
//! [task_queue]
//! starvation_timeout_ms = 15000
//! starvation_check_ms = 6000
//! ```

use std::time::Duration;

use feedline_types::config_defaults as defaults;
use feedline_types::{ConfigProvider, HasSessionConfig, HasTaskQueueConfig};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedlineConfig {
    /// Session lifetime configuration.
    pub session: Option<SessionConfig>,

    /// Task queue configuration.
    pub task_queue: Option<TaskQueueConfig>,
}

impl FeedlineConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let config: FeedlineConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: FeedlineConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }

        if other.task_queue.is_some() {
            self.task_queue = other.task_queue;
        }
    }

    /// The effective session section.
    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// The effective task queue section.
    pub fn task_queue(&self) -> TaskQueueConfig {
        self.task_queue.clone().unwrap_or_default()
    }

    fn validate(&self) -> crate::Result<()> {
        if let Some(session) = &self.session
            && session.lifetime_ms == 0
        {
            return Err(ConfigError::InvalidValue {
                field: "session.lifetime_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(queue) = &self.task_queue
            && queue.starvation_check_ms == 0
        {
            return Err(ConfigError::InvalidValue {
                field: "task_queue.starvation_check_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session lifetime configuration.
///
/// Sessions other than $HEAD that have not been accessed within
/// `lifetime_ms` are garbage collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub lifetime_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime_ms: defaults::SESSION_LIFETIME_MS,
        }
    }
}

impl ConfigProvider for SessionConfig {}

impl HasSessionConfig for SessionConfig {
    fn session_lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task Queue Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Task queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Maximum wait on a pending head reset before queued work is released.
    pub starvation_timeout_ms: u64,
    /// Interval between starvation checks.
    pub starvation_check_ms: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            starvation_timeout_ms: defaults::STARVATION_TIMEOUT_MS,
            starvation_check_ms: defaults::STARVATION_CHECK_MS,
        }
    }
}

impl ConfigProvider for TaskQueueConfig {}

impl HasTaskQueueConfig for TaskQueueConfig {
    fn starvation_timeout(&self) -> Duration {
        Duration::from_millis(self.starvation_timeout_ms)
    }

    fn starvation_check_interval(&self) -> Duration {
        Duration::from_millis(self.starvation_check_ms)
    }
}

// The whole file is a provider of both capabilities.
impl ConfigProvider for FeedlineConfig {}

impl HasSessionConfig for FeedlineConfig {
    fn session_lifetime(&self) -> Duration {
        self.session().session_lifetime()
    }
}

impl HasTaskQueueConfig for FeedlineConfig {
    fn starvation_timeout(&self) -> Duration {
        self.task_queue().starvation_timeout()
    }

    fn starvation_check_interval(&self) -> Duration {
        self.task_queue().starvation_check_interval()
    }
}
