//! JWKS proxy configuration.
//!
//! Configuration is read as JSON from the file named by `JCP_CONFIG`
//! (default `config.json`), then defaulted and validated. A `Config` that
//! came out of `defaults_and_validate` is the only shape the rest of the
//! crate accepts.
//!
//! ```json
//! {
//!   "jwks": {
//!     "https://issuer.example.com/.well-known/jwks.json": {
//!       "refreshInterval": "1h",
//!       "refreshTimeout": "10s"
//!     }
//!   },
//!   "listenAddress": "0.0.0.0:8080",
//!   "logFormat": "json",
//!   "requestMaxBytes": 1048576
//! }
//! ```

use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "JCP_CONFIG";

/// Configuration file used when `JCP_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Default time between background refreshes of a JWK Set.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default time to wait for a JWK Set fetch before giving up and logging.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Time limit on a whole validate request, including any on-demand key
/// refresh it triggers.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default HTTP listen address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8080";

/// Default request body ceiling (1 MiB).
pub const DEFAULT_REQUEST_MAX_BYTES: usize = 1 << 20;

/// Format of log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Human,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "" | "json" => Ok(LogFormat::Json),
            "human" => Ok(LogFormat::Human),
            other => Err(ConfigError::Invalid(format!(
                "invalid log format: {other:?}"
            ))),
        }
    }
}

/// Refresh policy for one remote JWK Set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySourceConfig {
    /// Time between background refreshes.
    pub refresh_interval: Duration,

    /// Time allowed for a single fetch.
    pub refresh_timeout: Duration,
}

impl Default for KeySourceConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }
}

/// Validated proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// JWK Set endpoint → refresh policy. Ordered so that multi-source
    /// lookups search endpoints deterministically.
    pub jwks: BTreeMap<String, KeySourceConfig>,

    /// Server bind address.
    pub listen_address: SocketAddr,

    /// Log output format.
    pub log_format: LogFormat,

    /// Maximum accepted request body size in bytes.
    pub request_max_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration as written on disk, before defaults are applied.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    #[serde(default)]
    pub jwks: HashMap<String, RawKeySourceConfig>,

    #[serde(default)]
    pub listen_address: String,

    #[serde(default)]
    pub log_format: String,

    #[serde(default)]
    pub request_max_bytes: usize,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawKeySourceConfig {
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub refresh_interval: Option<Duration>,

    #[serde(default, deserialize_with = "deserialize_duration")]
    pub refresh_timeout: Option<Duration>,
}

/// Parse a human-readable duration such as `"1h"`, `"90s"` or `"1h 30m"`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    value
        .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

impl Config {
    /// Load configuration from the file named by `JCP_CONFIG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Load configuration from a JSON document (for testing).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::defaults_and_validate(raw)
    }

    /// Apply defaults to zero values and reject anything unusable.
    pub fn defaults_and_validate(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.jwks.is_empty() {
            return Err(ConfigError::Invalid("no JWKS provided".to_string()));
        }

        let mut jwks = BTreeMap::new();
        for (endpoint, source) in raw.jwks {
            let url = Url::parse(&endpoint).map_err(|e| {
                ConfigError::Invalid(format!("failed to parse JWK Set URL {endpoint:?}: {e}"))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::Invalid(format!(
                    "invalid JWK Set URL scheme: {:?}",
                    url.scheme()
                )));
            }

            let refresh_interval = source
                .refresh_interval
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_REFRESH_INTERVAL);
            let refresh_timeout = source
                .refresh_timeout
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_REFRESH_TIMEOUT);
            // An on-demand refresh must finish before the request times out
            if refresh_timeout >= REQUEST_TIMEOUT {
                return Err(ConfigError::Invalid(format!(
                    "refresh timeout for {endpoint:?} must be less than the {}s request timeout",
                    REQUEST_TIMEOUT.as_secs()
                )));
            }

            jwks.insert(
                endpoint,
                KeySourceConfig {
                    refresh_interval,
                    refresh_timeout,
                },
            );
        }

        let listen_address = parse_listen_address(&raw.listen_address)?;
        let log_format = LogFormat::parse(&raw.log_format)?;

        let request_max_bytes = if raw.request_max_bytes == 0 {
            DEFAULT_REQUEST_MAX_BYTES
        } else {
            raw.request_max_bytes
        };

        Ok(Config {
            jwks,
            listen_address,
            log_format,
            request_max_bytes,
        })
    }
}

/// Parse the listen address, accepting the host-less `:8080` shorthand.
fn parse_listen_address(value: &str) -> Result<SocketAddr, ConfigError> {
    let value = if value.is_empty() {
        DEFAULT_LISTEN_ADDRESS.to_string()
    } else if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    };

    value
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("invalid listen address {value:?}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const VALID_URL: &str = "https://localhost";

    fn minimal_json() -> String {
        format!(r#"{{"jwks": {{"{VALID_URL}": {{}}}}}}"#)
    }

    #[test]
    fn test_from_json_success_with_defaults() {
        let config = Config::from_json(&minimal_json()).expect("Config should load successfully");

        assert_eq!(config.jwks.len(), 1);
        assert_eq!(
            config.jwks.get(VALID_URL),
            Some(&KeySourceConfig::default())
        );
        assert_eq!(
            config.listen_address,
            DEFAULT_LISTEN_ADDRESS.parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.request_max_bytes, DEFAULT_REQUEST_MAX_BYTES);
    }

    #[test]
    fn test_from_json_success_with_custom_values() {
        let json = r#"{
            "jwks": {
                "https://a.example.com/jwks.json": {"refreshInterval": "5m", "refreshTimeout": "3s"},
                "http://b.example.com/jwks.json": {"refreshInterval": "1h 30m"}
            },
            "listenAddress": "127.0.0.1:9000",
            "logFormat": "human",
            "requestMaxBytes": 4096
        }"#;

        let config = Config::from_json(json).expect("Config should load successfully");

        let a = config.jwks.get("https://a.example.com/jwks.json").unwrap();
        assert_eq!(a.refresh_interval, Duration::from_secs(300));
        assert_eq!(a.refresh_timeout, Duration::from_secs(3));

        let b = config.jwks.get("http://b.example.com/jwks.json").unwrap();
        assert_eq!(b.refresh_interval, Duration::from_secs(5400));
        assert_eq!(b.refresh_timeout, DEFAULT_REFRESH_TIMEOUT);

        assert_eq!(
            config.listen_address,
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(config.request_max_bytes, 4096);
    }

    #[test]
    fn test_jwks_ordered_by_endpoint() {
        let json = r#"{"jwks": {"https://z.example.com": {}, "https://a.example.com": {}}}"#;

        let config = Config::from_json(json).unwrap();
        let endpoints: Vec<&String> = config.jwks.keys().collect();
        assert_eq!(endpoints, ["https://a.example.com", "https://z.example.com"]);
    }

    #[test]
    fn test_zero_durations_replaced_by_defaults() {
        let json = format!(
            r#"{{"jwks": {{"{VALID_URL}": {{"refreshInterval": "0s", "refreshTimeout": "0s"}}}}}}"#
        );

        let config = Config::from_json(&json).unwrap();
        assert_eq!(config.jwks.get(VALID_URL), Some(&KeySourceConfig::default()));
    }

    #[test]
    fn test_empty_config_rejected() {
        let result = Config::from_json("{}");
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("no JWKS")));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = Config::from_json(r#"{"jwks": {":": {}}}"#);
        assert!(
            matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("failed to parse JWK Set URL"))
        );
    }

    #[test]
    fn test_invalid_url_scheme_rejected() {
        let result = Config::from_json(r#"{"jwks": {"tcp://localhost": {}}}"#);
        assert!(
            matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("invalid JWK Set URL scheme"))
        );
    }

    #[test]
    fn test_invalid_log_format_rejected() {
        let json = format!(r#"{{"jwks": {{"{VALID_URL}": {{}}}}, "logFormat": "invalid"}}"#);

        let result = Config::from_json(&json);
        assert!(
            matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("invalid log format"))
        );
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let json = format!(r#"{{"jwks": {{"{VALID_URL}": {{"refreshInterval": "soon"}}}}}}"#);

        let result = Config::from_json(&json);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_refresh_timeout_at_request_timeout_rejected() {
        let json = format!(r#"{{"jwks": {{"{VALID_URL}": {{"refreshTimeout": "30s"}}}}}}"#);

        let result = Config::from_json(&json);
        assert!(
            matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("must be less than the 30s request timeout"))
        );
    }

    #[test]
    fn test_refresh_timeout_below_request_timeout_accepted() {
        let json = format!(r#"{{"jwks": {{"{VALID_URL}": {{"refreshTimeout": "29s"}}}}}}"#);

        let config = Config::from_json(&json).unwrap();
        assert_eq!(
            config.jwks.get(VALID_URL).unwrap().refresh_timeout,
            Duration::from_secs(29)
        );
    }

    #[test]
    fn test_hostless_listen_address_accepted() {
        let json = format!(r#"{{"jwks": {{"{VALID_URL}": {{}}}}, "listenAddress": ":9090"}}"#);

        let config = Config::from_json(&json).unwrap();
        assert_eq!(
            config.listen_address,
            "0.0.0.0:9090".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_invalid_listen_address_rejected() {
        let json =
            format!(r#"{{"jwks": {{"{VALID_URL}": {{}}}}, "listenAddress": "not-an-address"}}"#);

        let result = Config::from_json(&json);
        assert!(
            matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("invalid listen address"))
        );
    }

    #[test]
    fn test_malformed_json_rejected() {
        let result = Config::from_json("{not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
