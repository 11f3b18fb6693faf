//! Server configuration loading from environment variables.
//!
//! All values are loaded from `MODELD_*` environment variables with sensible
//! defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MODELD_MODEL_STORE` | models | Model repository root directory |
//! | `MODELD_SERVER_ID` | inference:0 | Server identity in status responses |
//! | `MODELD_EXIT_ON_ERROR` | true | Abort startup on model config errors |
//! | `MODELD_STRICT_READINESS` | true | Failed init reports not-live as well |
//! | `MODELD_ALLOW_POLL_LOAD` | true | Load models added after startup |
//! | `MODELD_ALLOW_POLL_UNLOAD` | true | Unload models removed after startup |
//! | `MODELD_POLL_INTERVAL_SECS` | 15 | Repository poll interval |
//! | `MODELD_LOAD_TIMEOUT_SECS` | 30 | Watchdog bound on one load call |
//! | `MODELD_EVENT_QUEUE_DEPTH` | 64 | Bounded watcher event queue depth |
//! | `MODELD_LOG_FORMAT` | json | Log format (json or pretty) |
//! | `MODELD_LOG_LEVEL` | info | Log level filter |

use std::path::PathBuf;
use std::time::Duration;

use crate::telemetry::{LogConfig, LogFormat};
use crate::RegistryConfig;

/// All server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub registry: RegistryConfig,
    pub log: LogConfig,
}

/// Parse a `bool` env var, returning `default` on missing or invalid.
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => val.parse::<bool>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_registry_config() -> RegistryConfig {
    RegistryConfig {
        model_store: PathBuf::from(parse_string("MODELD_MODEL_STORE", "models")),
        server_id: parse_string("MODELD_SERVER_ID", "inference:0"),
        exit_on_error: parse_bool("MODELD_EXIT_ON_ERROR", true),
        strict_readiness: parse_bool("MODELD_STRICT_READINESS", true),
        enable_repository_load: parse_bool("MODELD_ALLOW_POLL_LOAD", true),
        enable_repository_unload: parse_bool("MODELD_ALLOW_POLL_UNLOAD", true),
        poll_interval: Duration::from_secs(parse_u64("MODELD_POLL_INTERVAL_SECS", 15).max(1)),
        load_timeout: Duration::from_secs(parse_u64("MODELD_LOAD_TIMEOUT_SECS", 30).max(1)),
        event_queue_depth: parse_usize("MODELD_EVENT_QUEUE_DEPTH", 64).max(1),
    }
}

fn load_log_config() -> LogConfig {
    let format = match parse_string("MODELD_LOG_FORMAT", "json").as_str() {
        "pretty" => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    LogConfig {
        format,
        level: parse_string("MODELD_LOG_LEVEL", "info"),
    }
}

impl EnvConfig {
    /// Load all configuration from the environment.
    pub fn from_env() -> Self {
        Self {
            registry: load_registry_config(),
            log: load_log_config(),
        }
    }
}
