//! Engine configuration.
//!
//! Defaults are persisted to a per-user config file. Environment variables
//! override any stored values to allow managed deployments to enforce policy.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::error::{EngineError, EngineResult};

const ENV_CONNECT_TIMEOUT_MS: &str = "MERGEN_CONNECT_TIMEOUT_MS";
const ENV_PROD_REQUIRE_CONFIRMATION: &str = "MERGEN_PROD_REQUIRE_CONFIRMATION";
const ENV_PROD_BLOCK_DANGEROUS: &str = "MERGEN_PROD_BLOCK_DANGEROUS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for opening and probing a session handle
    pub connect_timeout_ms: u64,
    /// Dangerous statements on production sessions need an acknowledgement
    pub prod_require_confirmation: bool,
    /// Dangerous statements on production sessions are refused outright
    pub prod_block_dangerous_sql: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            prod_require_confirmation: true,
            prod_block_dangerous_sql: false,
        }
    }
}

fn env_bool_opt(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64_opt(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring non-numeric override");
            None
        }
    }
}

/// `~/.mergen/config.json`, or `%APPDATA%\Mergen\config.json` on Windows
pub fn config_path() -> PathBuf {
    let mut path = data_dir();
    path.push("config.json");
    path
}

pub(crate) fn data_dir() -> PathBuf {
    if cfg!(windows) {
        let appdata = std::env::var_os("APPDATA")
            .unwrap_or_else(|| std::env::var_os("USERPROFILE").unwrap_or_default());
        let mut path = PathBuf::from(appdata);
        path.push("Mergen");
        path
    } else {
        let home = std::env::var_os("HOME").unwrap_or_default();
        let mut path = PathBuf::from(home);
        path.push(".mergen");
        path
    }
}

fn load_from_file(path: &Path) -> Option<EngineConfig> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
            None
        }
    }
}

impl EngineConfig {
    fn apply_env_overrides(&mut self) {
        if let Some(value) = env_u64_opt(ENV_CONNECT_TIMEOUT_MS) {
            self.connect_timeout_ms = value;
        }
        if let Some(value) = env_bool_opt(ENV_PROD_REQUIRE_CONFIRMATION) {
            self.prod_require_confirmation = value;
        }
        if let Some(value) = env_bool_opt(ENV_PROD_BLOCK_DANGEROUS) {
            self.prod_block_dangerous_sql = value;
        }
    }

    /// Loads the per-user config file with environment overrides applied
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// A missing or unreadable file yields the defaults
    pub fn load_from(path: &Path) -> Self {
        let mut config = load_from_file(path).unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    pub fn save(&self) -> EngineResult<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::internal(format!("Failed to create config directory: {}", e))
            })?;
        }

        let payload = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::internal(format!("Save failed: {}", e)))?;
        fs::write(path, payload)
            .map_err(|e| EngineError::internal(format!("Save failed: {}", e)))?;
        Ok(())
    }
}
