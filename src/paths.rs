//! Platform data paths
//!
//! Resolves where configuration and pad bindings live under the platform
//! app-data directory.

use std::path::PathBuf;

const APP_DIR_NAME: &str = "padgrid-gw";

/// Base data directory (`%APPDATA%/padgrid-gw`, `~/.local/share/padgrid-gw`,
/// or the current directory as a last resort)
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    data_dir().join("config.yaml")
}

/// Pad binding snapshot location
pub fn bindings_path() -> PathBuf {
    data_dir().join("bindings.json")
}
