//! Configuration module for the threadit backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// How the persistent store handle is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// One pool shared by every request for the lifetime of the process.
    Shared,
    /// A fresh single-connection pool opened for every request.
    PerRequest,
}

impl StoreMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Some(StoreMode::Shared),
            "per-request" | "per_request" => Some(StoreMode::PerRequest),
            _ => None,
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Redis connection URL; the in-process cache is used when unset
    pub redis_url: Option<String>,
    /// A post is cached once its vote count is strictly above this value
    pub cache_after_upvotes: i64,
    pub store_mode: StoreMode,
    /// Default feed page size
    pub page_size: i64,
}

/// Invalid configuration value.
#[derive(Debug)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.key, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("THREADIT_DB_PATH")
            .unwrap_or_else(|_| "./data/threadit.sqlite".to_string())
            .into();

        let bind_addr = parse_var("THREADIT_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = env::var("THREADIT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_format = match env::var("THREADIT_LOG_FORMAT").ok().as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError {
                    key: "THREADIT_LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        let redis_url = env::var("THREADIT_REDIS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let cache_after_upvotes = parse_var("THREADIT_CACHE_AFTER_UPVOTES", "1")?;

        let store_mode = match env::var("THREADIT_STORE_MODE") {
            Ok(value) => StoreMode::parse(&value).ok_or(ConfigError {
                key: "THREADIT_STORE_MODE",
                value,
            })?,
            Err(_) => StoreMode::Shared,
        };

        let page_size: i64 = parse_var("THREADIT_PAGE_SIZE", "2")?;
        if page_size < 1 {
            return Err(ConfigError {
                key: "THREADIT_PAGE_SIZE",
                value: page_size.to_string(),
            });
        }

        Ok(Self {
            db_path,
            bind_addr,
            log_level,
            log_format,
            redis_url,
            cache_after_upvotes,
            store_mode,
            page_size,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|_| ConfigError { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        env::remove_var("THREADIT_DB_PATH");
        env::remove_var("THREADIT_BIND_ADDR");
        env::remove_var("THREADIT_LOG_LEVEL");
        env::remove_var("THREADIT_LOG_FORMAT");
        env::remove_var("THREADIT_REDIS_URL");
        env::remove_var("THREADIT_CACHE_AFTER_UPVOTES");
        env::remove_var("THREADIT_STORE_MODE");
        env::remove_var("THREADIT_PAGE_SIZE");

        let config = Config::from_env().unwrap();

        assert_eq!(config.db_path, PathBuf::from("./data/threadit.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.redis_url.is_none());
        assert_eq!(config.cache_after_upvotes, 1);
        assert_eq!(config.store_mode, StoreMode::Shared);
        assert_eq!(config.page_size, 2);
    }

    #[test]
    fn test_store_mode_parse() {
        assert_eq!(StoreMode::parse("shared"), Some(StoreMode::Shared));
        assert_eq!(StoreMode::parse("Per-Request"), Some(StoreMode::PerRequest));
        assert_eq!(StoreMode::parse("per_request"), Some(StoreMode::PerRequest));
        assert_eq!(StoreMode::parse("global"), None);
    }
}
