//! # Engine Configuration
//!
//! Configuration management for the fulfillment engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SALDO_DB_PATH=/var/lib/saldo/saldo.db                              │
//! │     SALDO_RETRY_MAX_ATTEMPTS=5                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/saldo/engine.toml (Linux)                                │
//! │     ~/Library/Application Support/com.saldo.saldo/engine.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5 attempts x 100ms retry, 5s dispatcher poll                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [database]
//! path = "./saldo.db"
//! max_connections = 5
//!
//! [retry]
//! max_attempts = 5
//! backoff_ms = 100
//!
//! [dispatcher]
//! poll_interval_secs = 5
//! batch_size = 50
//! handler_max_attempts = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use saldo_db::DbConfig;

use crate::error::{EngineError, EngineResult};
use crate::retry::RetryPolicy;

// =============================================================================
// Database Settings
// =============================================================================

/// Storage settings handed down to the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "./saldo.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Bounds for the write-conflict retry loop.
///
/// Every engine operation runs its transaction under this policy: a
/// version conflict or `SQLITE_BUSY` re-runs the whole attempt after a
/// fixed delay, up to `max_attempts` tries in total.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (milliseconds).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    crate::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    crate::retry::DEFAULT_BACKOFF_MS
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// =============================================================================
// Dispatcher Settings
// =============================================================================

/// Event dispatcher tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Interval between outbox poll cycles (seconds). Commits also nudge
    /// the dispatcher directly, so this is a catch-up bound, not the
    /// delivery latency.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Events and jobs picked up per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Delivery attempts per handler job before it is parked as failed.
    #[serde(default = "default_handler_max_attempts")]
    pub handler_max_attempts: i64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    50
}

fn default_handler_max_attempts() -> i64 {
    3
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        DispatcherSettings {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            handler_max_attempts: default_handler_max_attempts(),
        }
    }
}

impl DispatcherSettings {
    /// Interval between poll cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
///
/// ## Example Config File
/// ```toml
/// [database]
/// path = "/var/lib/saldo/saldo.db"
/// max_connections = 5
///
/// [retry]
/// max_attempts = 5
/// backoff_ms = 100
///
/// [dispatcher]
/// poll_interval_secs = 5
/// batch_size = 50
/// handler_max_attempts = 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Storage settings.
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Write-conflict retry bounds.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Event dispatcher tuning.
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
}

impl EngineConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        // Try to load from config file
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        // Override with environment variables
        config.apply_env_overrides();

        // Validate the configuration
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.path.is_empty() {
            return Err(EngineError::InvalidConfig(
                "database.path must not be empty".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.dispatcher.batch_size == 0 {
            return Err(EngineError::InvalidConfig(
                "dispatcher.batch_size must be greater than 0".into(),
            ));
        }

        if self.dispatcher.handler_max_attempts < 1 {
            return Err(EngineError::InvalidConfig(
                "dispatcher.handler_max_attempts must be at least 1".into(),
            ));
        }

        if self.dispatcher.poll_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "dispatcher.poll_interval_secs must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // Database path
        if let Ok(path) = std::env::var("SALDO_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = path;
        }

        // Pool size
        if let Ok(max) = std::env::var("SALDO_DB_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse::<u32>() {
                self.database.max_connections = n;
            }
        }

        // Retry bounds
        if let Ok(attempts) = std::env::var("SALDO_RETRY_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                debug!(max_attempts = n, "Overriding retry attempts from environment");
                self.retry.max_attempts = n;
            }
        }
        if let Ok(backoff) = std::env::var("SALDO_RETRY_BACKOFF_MS") {
            if let Ok(ms) = backoff.parse::<u64>() {
                self.retry.backoff_ms = ms;
            }
        }

        // Dispatcher tuning
        if let Ok(interval) = std::env::var("SALDO_POLL_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                self.dispatcher.poll_interval_secs = secs;
            }
        }
        if let Ok(batch) = std::env::var("SALDO_BATCH_SIZE") {
            if let Ok(n) = batch.parse::<u32>() {
                self.dispatcher.batch_size = n;
            }
        }
        if let Ok(attempts) = std::env::var("SALDO_HANDLER_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<i64>() {
                self.dispatcher.handler_max_attempts = n;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "saldo", "saldo").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("engine.toml")
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Builds the retry policy these settings describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.backoff_ms),
        )
    }

    /// Builds the pool configuration these settings describe.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }

    /// Interval between dispatcher poll cycles.
    pub fn poll_interval(&self) -> Duration {
        self.dispatcher.poll_interval()
    }
}
