//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Persistence configuration
    pub persistence: PersistenceConfig,
    /// Generation service configuration
    pub provider: ProviderConfig,
    /// Broadcast bus configuration
    pub bus: BusConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// SQLite database path or `sqlite:` URL
    pub database_url: String,
}

/// Generation service configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the service exposing `POST /generate`
    pub base_url: String,
    /// Timeout for a single batch-mode call (in seconds)
    pub timeout_secs: u64,
    /// Longest silence tolerated between two reads of a streaming body (in seconds)
    pub stream_idle_timeout_secs: u64,
}

/// Broadcast bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Buffered events per topic before slow subscribers start lagging
    pub channel_capacity: usize,
    /// Outbound messages queued per WebSocket before the client counts as too slow
    pub socket_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8080,
                host: "0.0.0.0".to_string(),
            },
            persistence: PersistenceConfig {
                database_url: default_database_path(),
            },
            provider: ProviderConfig {
                base_url: "http://localhost:8000".to_string(),
                timeout_secs: 60,
                stream_idle_timeout_secs: 30,
            },
            bus: BusConfig {
                channel_capacity: 256,
                socket_queue_capacity: 256,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server: ServerConfig {
                port: env_parse("PORT").unwrap_or(defaults.server.port),
                host: env::var("HOST").unwrap_or(defaults.server.host),
            },
            persistence: PersistenceConfig {
                database_url: env::var("DATABASE_URL")
                    .unwrap_or(defaults.persistence.database_url),
            },
            provider: ProviderConfig {
                base_url: env::var("GENERATION_SERVICE_URL")
                    .unwrap_or(defaults.provider.base_url),
                timeout_secs: env_parse("PROVIDER_TIMEOUT_SECS")
                    .unwrap_or(defaults.provider.timeout_secs),
                stream_idle_timeout_secs: env_parse("STREAM_IDLE_TIMEOUT_SECS")
                    .unwrap_or(defaults.provider.stream_idle_timeout_secs),
            },
            bus: BusConfig {
                channel_capacity: env_parse("BUS_CHANNEL_CAPACITY")
                    .filter(|c: &usize| *c > 0)
                    .unwrap_or(defaults.bus.channel_capacity),
                socket_queue_capacity: env_parse("WS_QUEUE_CAPACITY")
                    .filter(|c: &usize| *c > 0)
                    .unwrap_or(defaults.bus.socket_queue_capacity),
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ProviderConfig {
    /// Batch call timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Streaming idle-read timeout as a `Duration`
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

// ~/.prompt-runner/prompt_runner.db, or the current directory without $HOME
fn default_database_path() -> String {
    let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| {
        if let Some(home) = env::var_os("HOME") {
            format!("{}/.prompt-runner", home.to_string_lossy())
        } else {
            ".prompt-runner".to_string()
        }
    });
    format!("{}/prompt_runner.db", data_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert_eq!(config.provider.timeout(), Duration::from_secs(60));
        assert_eq!(config.provider.stream_idle_timeout_secs, 30);
        assert_eq!(config.bus.channel_capacity, 256);
        assert_eq!(config.bus.socket_queue_capacity, 256);
        assert!(config.persistence.database_url.ends_with("prompt_runner.db"));
    }
}
