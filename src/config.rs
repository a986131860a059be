use std::str::FromStr;
use std::time::Duration;

use config::{Config, File};
use serde::Deserialize;

const DEFAULT_FILE_NAMES: [&str; 2] = ["gateway.config.yaml", "gateway.config.yml"];

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// The gateway logger configuration.
    #[serde(default)]
    pub log: LoggingConfig,

    /// Configuration for the HTTP server/listener.
    #[serde(default)]
    pub http: HttpServerConfig,

    /// Request size limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Subscription (SSE) delivery configuration.
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
}

/// Loads the gateway configuration from a YAML file. Without an explicit
/// path, the well-known file names are probed in the working directory and
/// defaults apply when none exists.
pub fn load_config(override_config_path: Option<String>) -> Result<GatewayConfig, GatewayConfigError> {
    let mut builder = Config::builder();

    match override_config_path {
        Some(path) => {
            builder = builder.add_source(File::with_name(&path).required(true));
        }
        None => {
            for name in DEFAULT_FILE_NAMES {
                builder = builder.add_source(File::with_name(name).required(false));
            }
        }
    }

    Ok(builder.build()?.try_deserialize::<GatewayConfig>()?)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpServerConfig {
    /// The host address to bind the HTTP server to.
    #[serde(default = "http_server_host_default")]
    host: String,

    /// The port to bind the HTTP server to.
    #[serde(default = "http_server_port_default")]
    port: u16,

    /// The path of the GraphQL endpoint. The introspection route is derived
    /// from it by appending `/schema.json`.
    #[serde(default = "graphql_path_default")]
    pub path: String,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: http_server_host_default(),
            port: http_server_port_default(),
            path: graphql_path_default(),
        }
    }
}

impl HttpServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn http_server_host_default() -> String {
    "0.0.0.0".to_string()
}

fn http_server_port_default() -> u16 {
    4000
}

fn graphql_path_default() -> String {
    "/graphql".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum size of an incoming request body, in bytes. Larger payloads
    /// are rejected before assembly.
    #[serde(default = "max_body_size_default")]
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: max_body_size_default(),
        }
    }
}

fn max_body_size_default() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionsConfig {
    /// How long a streaming connection may stay open without any emitted
    /// item before the upstream subscription is cancelled and the connection
    /// closed. Defaults to 10 seconds.
    #[serde(default = "idle_timeout_default", with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout: idle_timeout_default(),
        }
    }
}

fn idle_timeout_default() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// The level of logging to use.
    #[serde(default)]
    pub level: LogLevel,

    /// The format of the log messages.
    #[serde(default)]
    pub format: LogFormat,

    /// An explicit `tracing` filter directive. Takes precedence over `level`.
    #[serde(default)]
    pub filter: Option<String>,
}

impl LoggingConfig {
    pub fn env_filter_str(&self) -> &str {
        self.filter.as_deref().unwrap_or(self.level.as_str())
    }
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    PrettyTree,
    #[default]
    PrettyCompact,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = GatewayConfig::default();
        assert_eq!(config.http.address(), "0.0.0.0:4000");
        assert_eq!(config.http.path, "/graphql");
        assert_eq!(config.limits.max_body_size, 10 * 1024 * 1024);
        assert_eq!(config.subscriptions.idle_timeout, Duration::from_secs(10));
        assert_eq!(config.log.env_filter_str(), "info");
    }

    #[test]
    fn log_level_round_trips() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
