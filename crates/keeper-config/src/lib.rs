//! Configuration for the Keeper session store.
//!
//! A single TOML file with two sections:
//!
//! ```toml
//! [session]
//! path = "/var/lib/keeper/sessions"
//! name = "SID"
//! timeout = 14400
//! lifetime = 86400
//! cache_limit = 128
//! sweep_interval = 60
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

pub mod error;
pub mod types;

use std::path::Path;

pub use error::{ConfigError, Result};
pub use types::*;

/// Load and validate config from a specific file path.
pub fn load_config_file(path: &Path) -> Result<KeeperConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    KeeperConfig::from_toml(&contents)
}
