//! Finding and layering feedline config files.
//!
//! Layers, lowest precedence first:
//! 1. the user file: `$FEEDLINE_CONFIG_DIR/config.toml`, else
//!    `feedline/config.toml` under the platform config dir
//! 2. `feedline.toml` in the host's project directory

use std::path::{Path, PathBuf};

use crate::{ConfigError, FeedlineConfig, Result};

/// Project-local config filename.
pub const PROJECT_CONFIG_FILE: &str = "feedline.toml";

const USER_CONFIG_FILE: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "FEEDLINE_CONFIG_DIR";

/// Config files consulted for `project_dir`, lowest precedence first.
pub fn config_layers(project_dir: &Path) -> Vec<PathBuf> {
    user_config_dir()
        .map(|dir| dir.join(USER_CONFIG_FILE))
        .into_iter()
        .chain(std::iter::once(project_dir.join(PROJECT_CONFIG_FILE)))
        .collect()
}

fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|dir| dir.join("feedline")),
    }
}

/// Read and validate one config file.
pub fn load_config_file(path: &Path) -> Result<FeedlineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    FeedlineConfig::from_toml(&contents)
}

/// Merge the files in `layers` that exist, later layers winning.
///
/// Missing layers are skipped. A layer that exists but does not parse
/// fails the whole load.
pub fn load_layers<P: AsRef<Path>>(layers: &[P]) -> Result<FeedlineConfig> {
    let mut config = FeedlineConfig::new();
    for path in layers.iter().map(AsRef::as_ref).filter(|path| path.exists()) {
        config.merge(load_config_file(path)?);
    }
    Ok(config)
}
