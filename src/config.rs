//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! Everything is read once at startup from the environment (optionally seeded
//! from a `.env` file) and validated before the server binds. Nothing is
//! reloaded at runtime.
//!
//! # Security Configuration
//!
//! - `AUTH_ENABLED` / `API_KEYS`: enable API key authentication on `/api/*`,
//!   with keys given as `key:principal,key2:principal2`
//! - `TRUSTED_PROXIES`: CIDR ranges whose `X-Forwarded-For` is believed
//! - `CORS_ALLOWED_ORIGINS`: comma-separated origins (default `*`)
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT`: requests admitted per client per window (default: 100)
//! - `RATE_LIMIT_WINDOW_SECS`: trailing window length (default: 900)
//! - `RATE_LIMIT_WHITELIST`: client identities exempt from the limit
//!
//! # Upstream
//!
//! - `ETHEREUM_RPC_URL`: JSON-RPC endpoint
//! - `ETHEREUM_REQUEST_TIMEOUT_MS`: bound on each individual node call
//! - `ETHEREUM_RETRY_ATTEMPTS` / `ETHEREUM_RETRY_DELAY_MS`: accepted and
//!   reported, but no call is retried

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Operating mode. Debug exposes `/debug/*` and development conveniences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Debug,
    Release,
}

impl FromStr for AppMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(AppMode::Debug),
            "release" | "production" => Ok(AppMode::Release),
            other => Err(format!("unknown mode '{other}' (expected debug or release)")),
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppMode::Debug => write!(f, "debug"),
            AppMode::Release => write!(f, "release"),
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "console" | "pretty" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format '{other}' (expected json or text)")),
        }
    }
}

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Append to a file; lines are also written to stdout.
    File(PathBuf),
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("LOG_OUTPUT must not be empty".to_string()),
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            path => Ok(LogOutput::File(PathBuf::from(path))),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    /// Operating mode (default: debug)
    pub mode: AppMode,

    /// Declared transport read timeout. Not enforced by the listener.
    pub read_timeout: Duration,

    /// Declared transport write timeout. Not enforced by the listener.
    pub write_timeout: Duration,

    /// Budget for a whole request inside the Timeout stage (default: 30s)
    pub request_timeout: Duration,

    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests admitted per client identity per window (default: 100)
    pub rate_limit: usize,

    /// Trailing window the limit applies to (default: 15 minutes)
    pub rate_limit_window: Duration,

    /// Additional client identities that bypass the limit
    pub rate_limit_whitelist: Vec<String>,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    ///
    /// Forwarding headers are only believed when the peer address falls in
    /// one of these ranges. Empty means every peer is trusted, which is only
    /// appropriate behind a proxy that overwrites the headers.
    pub trusted_proxies: Vec<String>,

    /// Allowed CORS origins; `*` allows any origin without credentials
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Authentication
    // =========================================================================
    /// Whether `/api/*` requires an API key (default: false)
    pub auth_enabled: bool,

    /// Credential to principal pairs loaded at startup
    pub api_keys: Vec<(String, String)>,

    // =========================================================================
    // Ethereum Upstream
    // =========================================================================
    /// JSON-RPC endpoint of the node
    pub ethereum_rpc_url: String,

    /// Per-call upper bound for each of the three node queries (default: 10s)
    pub ethereum_request_timeout: Duration,

    /// Retry attempts for node calls. Accepted but not applied.
    pub ethereum_retry_attempts: u32,

    /// Delay between retries. Accepted but not applied.
    pub ethereum_retry_delay: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log filter directive (e.g., "info", "ethereum_data_api=debug")
    pub log_level: String,

    pub log_format: LogFormat,

    pub log_output: LogOutput,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable does not parse or the
    /// resulting configuration fails validation.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,
            mode: Self::parse_env("APP_MODE", defaults.mode)?,
            read_timeout: Duration::from_secs(Self::parse_env("SERVER_READ_TIMEOUT_SECS", 10)?),
            write_timeout: Duration::from_secs(Self::parse_env("SERVER_WRITE_TIMEOUT_SECS", 10)?),
            request_timeout: Duration::from_secs(Self::parse_env("REQUEST_TIMEOUT_SECS", 30)?),
            max_request_body_size: Self::parse_env(
                "MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,

            // Rate limiting
            rate_limit: Self::parse_env("RATE_LIMIT", defaults.rate_limit)?,
            rate_limit_window: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_WINDOW_SECS",
                900,
            )?),
            rate_limit_whitelist: parse_list(&env::var("RATE_LIMIT_WHITELIST").unwrap_or_default()),
            trusted_proxies: parse_list(&env::var("TRUSTED_PROXIES").unwrap_or_default()),
            cors_allowed_origins: parse_list(
                &env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            ),

            // Auth
            auth_enabled: match env::var("AUTH_ENABLED") {
                Ok(raw) => parse_bool("AUTH_ENABLED", &raw)?,
                Err(_) => defaults.auth_enabled,
            },
            api_keys: parse_api_keys(&env::var("API_KEYS").unwrap_or_default())?,

            // Ethereum
            ethereum_rpc_url: env::var("ETHEREUM_RPC_URL").unwrap_or(defaults.ethereum_rpc_url),
            ethereum_request_timeout: Duration::from_millis(Self::parse_env(
                "ETHEREUM_REQUEST_TIMEOUT_MS",
                10_000,
            )?),
            ethereum_retry_attempts: Self::parse_env(
                "ETHEREUM_RETRY_ATTEMPTS",
                defaults.ethereum_retry_attempts,
            )?,
            ethereum_retry_delay: Duration::from_millis(Self::parse_env(
                "ETHEREUM_RETRY_DELAY_MS",
                1000,
            )?),

            // Observability
            log_level: env::var("LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            log_format: Self::parse_env("LOG_FORMAT", defaults.log_format)?,
            log_output: Self::parse_env("LOG_OUTPUT", defaults.log_output)?,
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the offending variable.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit == 0 {
            return Err(AppError::Config(
                "RATE_LIMIT must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::Config(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::Config(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(AppError::Config(
                "REQUEST_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.ethereum_request_timeout.is_zero() {
            return Err(AppError::Config(
                "ETHEREUM_REQUEST_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.ethereum_rpc_url.trim().is_empty() {
            return Err(AppError::Config(
                "ETHEREUM_RPC_URL must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_debug(&self) -> bool {
        self.mode == AppMode::Debug
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Accepts `true/1/yes/y` and `false/0/no/n` (case-insensitive).
fn parse_bool(name: &str, raw: &str) -> AppResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" | "" => Ok(false),
        other => Err(AppError::Config(format!(
            "Invalid {name}: '{other}' is not a boolean"
        ))),
    }
}

/// Parse `key:principal,key2:principal2`.
///
/// # Errors
///
/// Rejects entries without exactly one `:` or with an empty side. The key
/// itself is never echoed in the message.
pub fn parse_api_keys(raw: &str) -> AppResult<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .enumerate()
        .map(|(index, pair)| {
            let mut parts = pair.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(principal), None)
                    if !key.trim().is_empty() && !principal.trim().is_empty() =>
                {
                    Ok((key.trim().to_string(), principal.trim().to_string()))
                }
                _ => Err(AppError::Config(format!(
                    "Invalid API_KEYS entry #{}: expected key:principal",
                    index + 1
                ))),
            }
        })
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8080,
            mode: AppMode::Debug,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            // Rate limiting
            rate_limit: 100,
            rate_limit_window: Duration::from_secs(15 * 60),
            rate_limit_whitelist: vec![],
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            cors_allowed_origins: vec!["*".to_string()],
            // Auth
            auth_enabled: false,
            api_keys: vec![],
            // Ethereum
            ethereum_rpc_url: "https://mainnet.infura.io/v3/YOUR_INFURA_KEY".to_string(),
            ethereum_request_timeout: Duration::from_secs(10),
            ethereum_retry_attempts: 3,
            ethereum_retry_delay: Duration::from_secs(1),
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            log_output: LogOutput::Stdout,
            metrics_port: 9090,
        }
    }
}
