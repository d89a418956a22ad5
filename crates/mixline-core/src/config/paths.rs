//! Standard locations of mixline files

use std::path::PathBuf;

/// Directory holding mixline configuration
///
/// Returns: `{config_dir}/mixline` (e.g. `~/.config/mixline` on Linux)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mixline")
}

/// Default path of the mixer configuration file
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}
