//! Configuration loading for Scout services
//!
//! Resolution priority, highest first:
//! 1. Environment variables (`SCOUT_*`)
//! 2. TOML config file (`$SCOUT_CONFIG`, else `~/.config/scout/scout.toml`)
//! 3. Compiled defaults
//!
//! Every service shares one config shape; each reads the sections it needs.
//! Missing required values (watch path for the watcher, API key for the
//! worker) are startup failures, not runtime surprises.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Discovery watcher settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Root directory observed for project directories
    pub watch_path: Option<PathBuf>,
    /// Directory depth observed below the root (1 = immediate children)
    pub depth: usize,
    /// Extra directory names to ignore beyond the built-in system set
    pub ignore_patterns: Vec<String>,
    /// Quiet period after the last event for a path before it is emitted
    pub debounce_ms: u64,
    /// A directory's stat must be unchanged this long before emission
    pub stability_threshold_ms: u64,
    /// Delay before the startup reconciliation scan
    pub startup_delay_ms: u64,
    /// Consecutive permission errors tolerated before the watcher goes unhealthy
    pub max_permission_errors: u32,
    /// Re-activate archived projects whose directories reappear on scan
    pub reset_deleted: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            watch_path: None,
            depth: 1,
            ignore_patterns: Vec::new(),
            debounce_ms: 2000,
            stability_threshold_ms: 2000,
            startup_delay_ms: 0,
            max_permission_errors: 10,
            reset_deleted: false,
        }
    }
}

/// Analysis worker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks draining the queue
    pub concurrency: usize,
    /// Result cache time-to-live, in hours
    pub cache_ttl_hours: u64,
    /// Token budget for assembled project context
    pub max_context_tokens: usize,
    /// Hard timeout on a single analyzer invocation
    pub ai_timeout_ms: u64,
    /// Analyzer model identifier
    pub model: String,
    /// Maximum tokens the analyzer may generate
    pub max_tokens: u32,
    /// Analyzer sampling temperature
    pub temperature: f32,
    /// Ops HTTP port for the worker service
    pub port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            cache_ttl_hours: 24,
            max_context_tokens: 10_000,
            ai_timeout_ms: 180_000,
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 4096,
            temperature: 0.3,
            port: 5810,
        }
    }
}

/// Rate limiter settings for the analyzer executor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum analyzer calls in flight at once
    pub max_concurrent: usize,
    /// Maximum analyzer call starts within any sliding 60-second window
    pub requests_per_minute: usize,
    /// Exponential backoff multiplier between retries
    pub backoff_multiplier: f64,
    /// Retries after the first attempt fails
    pub max_retries: u32,
    /// Base retry delay (tripled for rate-limit errors)
    pub initial_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            requests_per_minute: 10,
            backoff_multiplier: 2.0,
            max_retries: 3,
            initial_delay_ms: 2000,
        }
    }
}

/// Realtime fan-out settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Keepalive ping interval for client connections
    pub keepalive_ms: u64,
    /// HTTP port for the realtime gateway
    pub port: u16,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            keepalive_ms: 30_000,
            port: 5811,
        }
    }
}

/// Full Scout configuration, shared across services
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    /// SQLite database path; defaults to `scout.db` in the data directory
    pub database_path: Option<PathBuf>,
    /// Redis connection URL for bus, queue and cache
    pub redis_url: Option<String>,
    /// Anthropic API key; prefer the environment for this one
    pub api_key: Option<String>,
    pub watcher: WatcherConfig,
    pub worker: WorkerConfig,
    pub rate_limit: RateLimitConfig,
    pub realtime: RealtimeConfig,
}

impl ScoutConfig {
    /// Load configuration from the TOML file (if any) and apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a specific TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("parse {} failed: {}", path.display(), e)))
    }

    /// Overlay environment variables onto the loaded values
    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("SCOUT_WATCH_PATH") {
            self.watcher.watch_path = Some(PathBuf::from(path));
        }
        if let Ok(url) = std::env::var("SCOUT_REDIS_URL") {
            self.redis_url = Some(url);
        }
        if let Ok(path) = std::env::var("SCOUT_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        // Dedicated variable first, then the provider's conventional one
        if let Ok(key) = std::env::var("SCOUT_ANTHROPIC_API_KEY") {
            self.api_key = Some(key);
        } else if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("SCOUT_MODEL") {
            self.worker.model = model;
        }
    }

    /// Redis URL with the local default
    pub fn redis_url(&self) -> String {
        self.redis_url
            .clone()
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string())
    }

    /// Resolved database path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("scout.db"))
    }

    /// The watch root, required for the watcher service
    pub fn require_watch_path(&self) -> Result<PathBuf> {
        let path = self.watcher.watch_path.clone().ok_or_else(|| {
            Error::Config(
                "watch path not configured. Set SCOUT_WATCH_PATH or watcher.watch_path in \
                 the config file"
                    .to_string(),
            )
        })?;
        if !path.is_dir() {
            return Err(Error::Config(format!(
                "watch path does not exist or is not a directory: {}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// The analyzer API key, required for the worker service
    pub fn require_api_key(&self) -> Result<String> {
        match &self.api_key {
            Some(key) if !key.trim().is_empty() => Ok(key.clone()),
            _ => Err(Error::Config(
                "Anthropic API key not configured. Set SCOUT_ANTHROPIC_API_KEY (or \
                 ANTHROPIC_API_KEY) or api_key in the config file"
                    .to_string(),
            )),
        }
    }
}

/// Config file location: `$SCOUT_CONFIG` wins, else the platform config dir
fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SCOUT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("scout").join("scout.toml"))
}

/// Platform data directory for the default database location
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("scout"))
        .unwrap_or_else(|| PathBuf::from("./scout_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_shipped_values() {
        let config = ScoutConfig::default();
        assert_eq!(config.watcher.depth, 1);
        assert_eq!(config.watcher.debounce_ms, 2000);
        assert_eq!(config.watcher.stability_threshold_ms, 2000);
        assert_eq!(config.worker.concurrency, 5);
        assert_eq!(config.worker.cache_ttl_hours, 24);
        assert_eq!(config.worker.max_context_tokens, 10_000);
        assert_eq!(config.worker.ai_timeout_ms, 180_000);
        assert_eq!(config.rate_limit.max_concurrent, 3);
        assert_eq!(config.rate_limit.requests_per_minute, 10);
        assert_eq!(config.rate_limit.max_retries, 3);
        assert_eq!(config.rate_limit.initial_delay_ms, 2000);
        assert_eq!(config.realtime.keepalive_ms, 30_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
            redis_url = "redis://cache.internal:6379"

            [worker]
            concurrency = 2

            [watcher]
            debounce_ms = 500
        "#;
        let config: ScoutConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.redis_url(), "redis://cache.internal:6379");
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.worker.cache_ttl_hours, 24);
        assert_eq!(config.watcher.debounce_ms, 500);
        assert_eq!(config.watcher.stability_threshold_ms, 2000);
    }

    #[test]
    fn test_require_watch_path_missing_is_config_error() {
        let config = ScoutConfig::default();
        let err = config.require_watch_path().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_require_api_key_rejects_blank() {
        let mut config = ScoutConfig::default();
        config.api_key = Some("   ".to_string());
        assert!(config.require_api_key().is_err());

        config.api_key = Some("sk-test".to_string());
        assert_eq!(config.require_api_key().unwrap(), "sk-test");
    }
}
