//! Configuration management

use fleetsync_common::FleetError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::health::HealthThresholds;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/fleetsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Platform Configuration Constants
// ============================================================================

/// Default tracking-platform base URL.
pub const DEFAULT_PLATFORM_BASE_URL: &str = "http://localhost:8082";

/// Default HTTP timeout for one platform request, in seconds.
pub const DEFAULT_PLATFORM_REQUEST_TIMEOUT_SECS: u64 = 30;

/// User agent sent to the platform.
pub const DEFAULT_PLATFORM_USER_AGENT: &str = "FleetSync-Importer/1.0";

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default number of items per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Largest chunk size a caller may request.
pub const MAX_CHUNK_SIZE: usize = 1000;

/// Default number of chunks in flight at once.
pub const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 3;

/// Default number of items processed concurrently inside one chunk.
pub const DEFAULT_ITEM_CONCURRENCY: usize = 4;

/// Default attempts per item for recoverable errors.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay of the exponential retry backoff, in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Default cap on a single retry delay, in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Default timeout applied around each platform call, in seconds.
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Default cumulative failure ratio that fails a job (1.0 disables the check).
pub const DEFAULT_MAX_FAILURE_RATIO: f64 = 1.0;

/// Parse `key` from the environment, using `default` when it is unset
///
/// A value that is set but does not parse is an error rather than a silent
/// fallback.
fn env_or<T: FromStr>(key: &str, default: T) -> fleetsync_common::Result<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| FleetError::InvalidSetting {
                key: key.to_string(),
                value: raw,
            })
        },
        _ => Ok(default),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub platform: PlatformConfig,
    pub import: ImportConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Tracking-platform connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PLATFORM_BASE_URL.to_string(),
            api_token: None,
            request_timeout_secs: DEFAULT_PLATFORM_REQUEST_TIMEOUT_SECS,
            user_agent: DEFAULT_PLATFORM_USER_AGENT.to_string(),
        }
    }
}

impl PlatformConfig {
    pub fn from_env() -> fleetsync_common::Result<Self> {
        Ok(Self {
            base_url: std::env::var("PLATFORM_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PLATFORM_BASE_URL.to_string()),
            api_token: std::env::var("PLATFORM_API_TOKEN").ok().filter(|t| !t.is_empty()),
            request_timeout_secs: env_or(
                "PLATFORM_REQUEST_TIMEOUT_SECS",
                DEFAULT_PLATFORM_REQUEST_TIMEOUT_SECS,
            )?,
            user_agent: std::env::var("PLATFORM_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_PLATFORM_USER_AGENT.to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.is_empty() {
            anyhow::bail!("Platform base URL cannot be empty");
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!("Platform base URL must be http(s): {}", self.base_url);
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("Platform request timeout must be greater than 0");
        }
        Ok(())
    }
}

/// Import pipeline tuning
///
/// Every value has a documented default and can be overridden through a
/// `FLEETSYNC_*` or `HEALTH_*` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub chunk_size: usize,
    pub max_chunk_size: usize,
    /// K: chunks in flight while the platform is healthy
    pub max_concurrent_chunks: usize,
    pub item_concurrency: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub call_timeout_secs: u64,
    /// Fail the job once `failed / processed` exceeds this
    pub max_failure_ratio: f64,
    pub health: HealthThresholds,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            max_concurrent_chunks: DEFAULT_MAX_CONCURRENT_CHUNKS,
            item_concurrency: DEFAULT_ITEM_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            max_failure_ratio: DEFAULT_MAX_FAILURE_RATIO,
            health: HealthThresholds::default(),
        }
    }
}

impl ImportConfig {
    pub fn from_env() -> fleetsync_common::Result<Self> {
        let defaults = HealthThresholds::default();
        Ok(Self {
            chunk_size: env_or("FLEETSYNC_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            max_chunk_size: MAX_CHUNK_SIZE,
            max_concurrent_chunks: env_or(
                "FLEETSYNC_MAX_CONCURRENT_CHUNKS",
                DEFAULT_MAX_CONCURRENT_CHUNKS,
            )?,
            item_concurrency: env_or("FLEETSYNC_ITEM_CONCURRENCY", DEFAULT_ITEM_CONCURRENCY)?,
            max_attempts: env_or("FLEETSYNC_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            retry_base_delay_ms: env_or("FLEETSYNC_RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS)?,
            retry_max_delay_ms: env_or("FLEETSYNC_RETRY_MAX_DELAY_MS", DEFAULT_RETRY_MAX_DELAY_MS)?,
            call_timeout_secs: env_or("FLEETSYNC_CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS)?,
            max_failure_ratio: env_or("FLEETSYNC_MAX_FAILURE_RATIO", DEFAULT_MAX_FAILURE_RATIO)?,
            health: HealthThresholds {
                window_size: env_or("HEALTH_WINDOW_SIZE", defaults.window_size)?,
                healthy_success_rate: env_or(
                    "HEALTH_HEALTHY_SUCCESS_RATE",
                    defaults.healthy_success_rate,
                )?,
                degraded_success_rate: env_or(
                    "HEALTH_DEGRADED_SUCCESS_RATE",
                    defaults.degraded_success_rate,
                )?,
                degraded_consecutive_failures: env_or(
                    "HEALTH_DEGRADED_CONSECUTIVE_FAILURES",
                    defaults.degraded_consecutive_failures,
                )?,
                unhealthy_consecutive_failures: env_or(
                    "HEALTH_UNHEALTHY_CONSECUTIVE_FAILURES",
                    defaults.unhealthy_consecutive_failures,
                )?,
                max_issues: env_or("HEALTH_MAX_ISSUES", defaults.max_issues)?,
            },
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 || self.chunk_size > self.max_chunk_size {
            anyhow::bail!(
                "Chunk size must be within 1..={} (got {})",
                self.max_chunk_size,
                self.chunk_size
            );
        }
        if self.max_concurrent_chunks == 0 {
            anyhow::bail!("Max concurrent chunks must be greater than 0");
        }
        if self.item_concurrency == 0 {
            anyhow::bail!("Item concurrency must be greater than 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("Max attempts must be at least 1");
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!(
                "Retry base delay ({}ms) cannot exceed max delay ({}ms)",
                self.retry_base_delay_ms,
                self.retry_max_delay_ms
            );
        }
        if self.call_timeout_secs == 0 {
            anyhow::bail!("Call timeout must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.max_failure_ratio) {
            anyhow::bail!(
                "Max failure ratio must be within 0.0..=1.0 (got {})",
                self.max_failure_ratio
            );
        }
        self.health.validate().map_err(anyhow::Error::msg)?;
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Chunk size for a request, falling back to the configured default
    pub fn resolve_batch_size(&self, requested: Option<usize>) -> Result<usize, String> {
        match requested {
            None => Ok(self.chunk_size),
            Some(size) if (1..=self.max_chunk_size).contains(&size) => Ok(size),
            Some(size) => Err(format!(
                "batchSize must be within 1..={} (got {size})",
                self.max_chunk_size
            )),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("FLEETSYNC_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("FLEETSYNC_PORT", DEFAULT_SERVER_PORT)?,
                shutdown_timeout_secs: env_or(
                    "FLEETSYNC_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                )?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS)?,
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS)?,
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true)?,
            },
            platform: PlatformConfig::from_env()?,
            import: ImportConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        self.platform.validate()?;
        self.import.validate()?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            platform: PlatformConfig::default(),
            import: ImportConfig::default(),
        }
    }
}
