use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::routing::{PolicyError, RoutingPolicy};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the dispatch service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub dispatch: DispatchRuntimeConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = LogFormat::from_str(
            &env::var("APP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
        );

        let routing_policy_path = env::var("ROUTING_POLICY_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let tier_recalc_interval_secs = env::var("TIER_RECALC_INTERVAL_SECS")
            .unwrap_or_else(|_| "900".to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::InvalidInterval)?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                format: log_format,
            },
            dispatch: DispatchRuntimeConfig {
                routing_policy_path,
                tier_recalc_interval_secs,
            },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

/// Where the routing policy comes from and how often vendor tiers are recomputed.
#[derive(Debug, Clone)]
pub struct DispatchRuntimeConfig {
    pub routing_policy_path: Option<PathBuf>,
    pub tier_recalc_interval_secs: u64,
}

impl DispatchRuntimeConfig {
    pub fn tier_recalc_interval(&self) -> Duration {
        Duration::from_secs(self.tier_recalc_interval_secs)
    }
}

/// Read a JSON routing policy from disk and validate it before the engine sees it.
pub fn load_routing_policy(path: &Path) -> Result<RoutingPolicy, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::PolicyRead {
        path: path.to_path_buf(),
        source,
    })?;
    let policy: RoutingPolicy =
        serde_json::from_str(&raw).map_err(|source| ConfigError::PolicyParse {
            path: path.to_path_buf(),
            source,
        })?;
    policy.validate().map_err(ConfigError::PolicyInvalid)?;
    Ok(policy)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidInterval,
    PolicyRead { path: PathBuf, source: std::io::Error },
    PolicyParse { path: PathBuf, source: serde_json::Error },
    PolicyInvalid(PolicyError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidInterval => {
                write!(f, "TIER_RECALC_INTERVAL_SECS must be a positive integer")
            }
            ConfigError::PolicyRead { path, .. } => {
                write!(f, "unable to read routing policy {}", path.display())
            }
            ConfigError::PolicyParse { path, source } => {
                write!(f, "routing policy {} is malformed: {source}", path.display())
            }
            ConfigError::PolicyInvalid(err) => write!(f, "routing policy rejected: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidInterval => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::PolicyRead { source, .. } => Some(source),
            ConfigError::PolicyParse { source, .. } => Some(source),
            ConfigError::PolicyInvalid(err) => Some(err),
        }
    }
}
