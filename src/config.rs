//! Configuration handling for QueryDesk.
//!
//! This module provides configuration management via CLI arguments and
//! environment variables, plus the engine tuning knobs derived from them.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;

/// TTL for cached execution results.
pub const RESULT_CACHE_TTL_SECS: u64 = 300;

/// Rows per streamed batch.
pub const STREAM_BATCH_SIZE: usize = 1000;

const CONNECTIONS_FILE: &str = "connections.json";
const FOLDERS_FILE: &str = "folders.json";

/// QueryDesk configuration, parsed from CLI arguments and environment.
#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Directory holding the durable stores (created if missing).
    #[arg(long, env = "QUERYDESK_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Seconds to wait for a single connect attempt.
    #[arg(long, env = "QUERYDESK_CONNECT_TIMEOUT_SECS", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,

    /// Seconds a query may run before it is abandoned.
    #[arg(long, env = "QUERYDESK_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Connect attempts before giving up.
    #[arg(long, env = "QUERYDESK_CONNECT_ATTEMPTS", default_value_t = DEFAULT_CONNECT_ATTEMPTS)]
    pub connect_attempts: u32,

    /// Base interval between connect retries, in milliseconds.
    /// Attempt N waits N times this interval (linear backoff).
    #[arg(long, env = "QUERYDESK_RETRY_INTERVAL_MS", default_value_t = DEFAULT_RETRY_INTERVAL_MS)]
    pub retry_interval_ms: u64,

    /// Log level filter (overridden by RUST_LOG when set).
    #[arg(long, env = "QUERYDESK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON.
    #[arg(long, env = "QUERYDESK_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

impl Config {
    /// Path of the connections table.
    pub fn connections_path(&self) -> PathBuf {
        self.data_dir.join(CONNECTIONS_FILE)
    }

    /// Path of the folders table.
    pub fn folders_path(&self) -> PathBuf {
        self.data_dir.join(FOLDERS_FILE)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_attempts == 0 {
            return Err("connect_attempts must be at least 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than 0".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Engine tuning knobs derived from this configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_attempts: self.connect_attempts,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }
}

/// Tuning knobs shared by the dialer and the execution engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub connect_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        }
    }
}
