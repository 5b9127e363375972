use crate::client::RetryMode;
use crate::error::{AutosignError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Thresholds and budgets of the proxy resilience engine
    pub engine: EngineConfig,
    /// Upstream proxy provider
    pub provider: ProviderConfig,
    /// Remote service the accounts act against
    pub remote: RemoteConfig,
    /// Status API server configuration
    pub api: ApiServerConfig,
    /// Key-value storage location
    pub storage: StorageConfig,
    /// Daily batch schedule
    pub schedule: ScheduleConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Consecutive failures after which a shared pool proxy is disabled
    pub disable_threshold: u32,
    /// Failures after which an account binding is considered invalid
    pub account_fail_threshold: u32,
    /// Attempt budget of the bounded retry policy
    pub bounded_max_attempts: u32,
    /// Attempt budget of the retry-until-success policy
    pub unbounded_max_attempts: u32,
    /// Timeout of a single remote operation
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disable_threshold: 5,
            account_fail_threshold: 3,
            bounded_max_attempts: 20,
            unbounded_max_attempts: 20,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider endpoint; when unset every account connects directly
    pub url: Option<String>,
    /// Query parameters appended to the provider request
    pub params: Vec<(String, String)>,
    /// Timeout of the provider request
    pub fetch_timeout: Duration,
    /// Echo endpoint used for the liveness probe
    pub probe_url: String,
    /// Timeout of the liveness probe
    pub probe_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: None,
            params: Vec::new(),
            fetch_timeout: Duration::from_secs(10),
            probe_url: "http://httpbin.org/ip".to_string(),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the remote service
    pub base_url: String,
    /// User-Agent header sent with every remote call
    pub user_agent: String,
    /// Asset name read from the balance response and withdrawn
    pub coin_type: String,
    /// Withdrawal password, empty when the service does not require one
    pub withdraw_password: String,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8001)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the JSON snapshots
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Local hour of the daily run
    pub hour: u32,
    /// Local minute of the daily run
    pub minute: u32,
    /// Retry policy used for every remote operation of a batch
    pub retry_mode: RetryMode,
    /// Accounts processed concurrently within one batch
    pub concurrency: usize,
    /// Provider attempts used to top up the shared pool before a batch
    pub pool_topup_tries: u32,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let engine = EngineConfig {
            disable_threshold: parse_env_or("ENGINE_DISABLE_THRESHOLD", "5")?,
            account_fail_threshold: parse_env_or("ENGINE_ACCOUNT_FAIL_THRESHOLD", "3")?,
            bounded_max_attempts: parse_env_or("ENGINE_BOUNDED_MAX_ATTEMPTS", "20")?,
            unbounded_max_attempts: parse_env_or("ENGINE_UNBOUNDED_MAX_ATTEMPTS", "20")?,
            request_timeout: Duration::from_secs(parse_env_or("ENGINE_REQUEST_TIMEOUT", "30")?),
        };
        if engine.disable_threshold == 0 || engine.account_fail_threshold == 0 {
            return Err(AutosignError::InvalidConfig(
                "failure thresholds must be at least 1".into(),
            ));
        }
        if engine.bounded_max_attempts == 0 || engine.unbounded_max_attempts == 0 {
            return Err(AutosignError::InvalidConfig(
                "attempt budgets must be at least 1".into(),
            ));
        }

        let provider_url = get_env_or("PROVIDER_URL", "");
        let provider_url = provider_url.trim();
        let provider = ProviderConfig {
            url: if provider_url.is_empty() {
                None
            } else {
                Some(validate_http_url("PROVIDER_URL", provider_url)?)
            },
            params: parse_query_params(&get_env_or("PROVIDER_PARAMS", "")),
            fetch_timeout: Duration::from_secs(parse_env_or("PROVIDER_FETCH_TIMEOUT", "10")?),
            probe_url: validate_http_url(
                "PROVIDER_PROBE_URL",
                &get_env_or("PROVIDER_PROBE_URL", "http://httpbin.org/ip"),
            )?,
            probe_timeout: Duration::from_secs(parse_env_or("PROVIDER_PROBE_TIMEOUT", "10")?),
        };

        let remote = RemoteConfig {
            base_url: validate_http_url(
                "REMOTE_BASE_URL",
                &get_env_or("REMOTE_BASE_URL", "https://qy.doufp.com"),
            )?,
            user_agent: get_env_or("REMOTE_USER_AGENT", DEFAULT_USER_AGENT),
            coin_type: get_env_or("REMOTE_COIN_TYPE", "income_wallet"),
            withdraw_password: get_env_or("REMOTE_WITHDRAW_PASSWORD", ""),
        };

        let retry_mode_raw = get_env_or("SCHEDULE_RETRY_MODE", "bounded");
        let schedule = ScheduleConfig {
            hour: parse_env_or("SCHEDULE_HOUR", "0")?,
            minute: parse_env_or("SCHEDULE_MINUTE", "30")?,
            retry_mode: RetryMode::from_str(&retry_mode_raw).ok_or_else(|| {
                AutosignError::InvalidConfig(format!(
                    "SCHEDULE_RETRY_MODE must be bounded or until_success, got {}",
                    retry_mode_raw
                ))
            })?,
            concurrency: parse_env_or::<usize>("SCHEDULE_CONCURRENCY", "1")?.max(1),
            pool_topup_tries: parse_env_or("SCHEDULE_POOL_TOPUP_TRIES", "5")?,
        };
        if schedule.hour > 23 || schedule.minute > 59 {
            return Err(AutosignError::InvalidConfig(
                "SCHEDULE_HOUR must be 0-23 and SCHEDULE_MINUTE 0-59".into(),
            ));
        }

        Ok(Config {
            engine,
            provider,
            remote,
            api: ApiServerConfig {
                port: get_env_or("API_PORT", "8001").parse().map_err(|_| {
                    AutosignError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from(get_env_or("DATA_DIR", "data")),
            },
            schedule,
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn validate_http_url(key: &str, raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        AutosignError::InvalidConfig(format!("{} must be a valid URL: {}", key, e))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url.as_str().trim_end_matches('/').to_string()),
        other => Err(AutosignError::InvalidConfig(format!(
            "{} has unsupported scheme: {}",
            key, other
        ))),
    }
}

/// Parse `a=1&b=2` into ordered pairs, dropping empty keys
fn parse_query_params(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.trim().as_bytes())
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn parse_env_or<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| AutosignError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
