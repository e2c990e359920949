//! Configuration system for the Feedline session manager.
//!
//! Provides TOML-based configuration with:
//! - `[session]` lifetime settings
//! - `[task_queue]` starvation limits
//! - Config file layering (user config + project-local overrides)
//!
//! The section types implement the capability traits from
//! `feedline-types`, so they can be handed straight to the session manager.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{PROJECT_CONFIG_FILE, config_layers, load_config_file, load_layers};
pub use error::{ConfigError, Result};
pub use types::*;
