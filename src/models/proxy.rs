use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    #[default]
    Http,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" | "https" => Some(ProxyScheme::Http),
            "socks5" | "socks5h" => Some(ProxyScheme::Socks5),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proxy authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

/// A network intermediary through which outbound requests are routed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub scheme: ProxyScheme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<ProxyCredentials>,
    #[serde(default)]
    pub consecutive_failure_count: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl ProxyRecord {
    /// Fresh, enabled http proxy with no failure history
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            scheme: ProxyScheme::Http,
            credentials: None,
            consecutive_failure_count: 0,
            enabled: true,
            last_used: None,
        }
    }

    pub fn with_scheme(mut self, scheme: ProxyScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Both host and port are set
    pub fn has_endpoint(&self) -> bool {
        !self.host.trim().is_empty() && self.port != 0
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Proxy URL without credentials, suitable for logs
    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme, self.address())
    }

    /// Same host, port and scheme
    pub fn same_endpoint(&self, other: &ProxyRecord) -> bool {
        self.host == other.host && self.port == other.port && self.scheme == other.scheme
    }

    /// Loopback or unspecified hosts are manual/test entries, never used for live traffic
    pub fn is_local(&self) -> bool {
        let host = self
            .host
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');
        if host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        match host.parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
            Err(_) => false,
        }
    }

    /// Successful use resets the failure streak
    pub fn record_success(&mut self) {
        self.consecutive_failure_count = 0;
        self.last_used = Some(Utc::now());
    }

    /// Failed use extends the streak and disables the record at `disable_threshold`
    pub fn record_failure(&mut self, disable_threshold: u32) {
        self.consecutive_failure_count = self.consecutive_failure_count.saturating_add(1);
        if self.consecutive_failure_count >= disable_threshold {
            self.enabled = false;
        }
    }
}

impl std::fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url())
    }
}
