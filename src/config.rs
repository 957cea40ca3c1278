// src/config.rs

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_ROOT: &str = "./botic";

/// Runtime settings, resolved from the environment (with an optional `.env`
/// file) and overridable per-flag by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub root: PathBuf,
    pub sweep_interval_secs: u64,
    pub pacing_step_ms: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            sweep_interval_secs: 10,
            pacing_step_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load `env_file` if it exists, then resolve settings from the
    /// process environment.
    pub fn load(env_file: &Path) -> Self {
        if env_file.exists() {
            dotenvy::from_path(env_file).ok();
            info!("Loaded .env from {}", env_file.display());
        } else {
            debug!("no .env at {}", env_file.display());
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            root: env::var("BOTIC_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root),
            sweep_interval_secs: env_u64("BOTIC_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            pacing_step_ms: env_u64("BOTIC_PACING_STEP_MS", defaults.pacing_step_ms),
            log_level: env::var("BOTIC_LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn pacing_step(&self) -> Duration {
        Duration::from_millis(self.pacing_step_ms)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
