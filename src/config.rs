//! Configuration Module
//!
//! Handles loading and managing gateway configuration from environment variables.

use std::env;
use std::path::PathBuf;

use crate::error::{CacheError, Result};

/// Gateway configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of cached responses
    pub max_cache_size: i64,
    /// Whether responses carry X-Cache debug headers
    pub debug_headers: bool,
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup interval in seconds, 0 disables the task
    pub cleanup_interval: u64,
    /// Base URL requests are forwarded to
    pub upstream_url: String,
    /// JSON policy table
    pub policy_file: Option<PathBuf>,
    /// JSON snapshot used to survive restarts
    pub persist_path: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_CACHE_SIZE` - Maximum cached responses (default: 100)
    /// - `DEBUG_HEADERS` - Emit X-Cache headers (default: true)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 60)
    /// - `UPSTREAM_URL` - Forwarding target (default: https://api.github.com)
    /// - `POLICY_FILE` - Path of the JSON policy table (default: none)
    /// - `PERSIST_PATH` - Path of the durable snapshot (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_cache_size: parse_var("MAX_CACHE_SIZE").unwrap_or(defaults.max_cache_size),
            debug_headers: parse_var("DEBUG_HEADERS").unwrap_or(defaults.debug_headers),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            cleanup_interval: parse_var("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            upstream_url: env::var("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            policy_file: path_var("POLICY_FILE"),
            persist_path: path_var("PERSIST_PATH"),
        }
    }

    /// Rejects values the gateway cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size <= 0 {
            return Err(CacheError::InvalidConfig(format!(
                "MAX_CACHE_SIZE must be positive, got: {}",
                self.max_cache_size
            )));
        }
        if !self.upstream_url.starts_with("http://") && !self.upstream_url.starts_with("https://") {
            return Err(CacheError::InvalidConfig(format!(
                "UPSTREAM_URL must be an http(s) URL, got: {}",
                self.upstream_url
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn path_var(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cache_size: 100,
            debug_headers: true,
            server_port: 3000,
            cleanup_interval: 60,
            upstream_url: "https://api.github.com".to_string(),
            policy_file: None,
            persist_path: None,
        }
    }
}
