use serde::Serialize;
use serde_json::Value;

/// Why a remote call did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    NetworkError { message: String },
    Timeout,
    ProxyConnectFailure { message: String },
    HttpStatusError { status: u16 },
    UpstreamRejected { code: i64, message: String },
    Cancelled,
}

impl FailureReason {
    /// Application-level rejections are final; everything else may be retried
    pub fn is_terminal(&self) -> bool {
        matches!(self, FailureReason::UpstreamRejected { .. })
    }

    pub fn is_proxy_failure(&self) -> bool {
        matches!(self, FailureReason::ProxyConnectFailure { .. })
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NetworkError { message } => write!(f, "network error: {}", message),
            FailureReason::Timeout => write!(f, "request timed out"),
            FailureReason::ProxyConnectFailure { message } => {
                write!(f, "proxy connection failed: {}", message)
            }
            FailureReason::HttpStatusError { status } => write!(f, "HTTP status {}", status),
            FailureReason::UpstreamRejected { code, message } => {
                write!(f, "rejected by remote (code {}): {}", code, message)
            }
            FailureReason::Cancelled => write!(f, "cancelled by shutdown"),
        }
    }
}

/// Successful `{code, msg, data}` envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponsePayload {
    pub code: i64,
    pub msg: String,
    pub data: Value,
}

impl ResponsePayload {
    pub fn token(&self) -> Option<&str> {
        self.data
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Amount of `coin` in `data.coinList`, zero when absent or unreadable
    pub fn asset_balance(&self, coin: &str) -> f64 {
        self.data
            .get("coinList")
            .and_then(Value::as_array)
            .and_then(|list| {
                list.iter()
                    .find(|asset| asset.get("name_en").and_then(Value::as_str) == Some(coin))
            })
            .and_then(|asset| match asset.get("num") {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse().ok(),
                _ => None,
            })
            .unwrap_or(0.0)
    }
}

/// Result of one logical remote operation
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success(ResponsePayload),
    RetryableFailure(FailureReason),
    TerminalFailure(FailureReason),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success(_))
    }

    pub fn payload(&self) -> Option<&ResponsePayload> {
        match self {
            RequestOutcome::Success(p) => Some(p),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            RequestOutcome::Success(_) => None,
            RequestOutcome::RetryableFailure(r) | RequestOutcome::TerminalFailure(r) => Some(r),
        }
    }

    /// Human-readable summary for persisted status records
    pub fn message(&self) -> String {
        match self {
            RequestOutcome::Success(p) => p.msg.clone(),
            RequestOutcome::RetryableFailure(r) | RequestOutcome::TerminalFailure(r) => match r {
                FailureReason::UpstreamRejected { message, .. } => message.clone(),
                other => other.to_string(),
            },
        }
    }
}
