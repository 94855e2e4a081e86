mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, RewardsConfig, StreaksConfig};
pub use database::{AddOutcome, Database};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `CROSSBOT_DATA_DIR` wins outright. Otherwise `~/.config/crossbot/`, or
/// `~/.config/crossbot-dev/` when `CROSSBOT_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("CROSSBOT_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("CROSSBOT_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("crossbot-dev")
            } else {
                base_dir.join("crossbot")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::NoDataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
