//! Retry policies

use std::time::Duration;

use serde::Serialize;

use crate::config::EngineConfig;

/// Which retry policy a batch runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    #[default]
    Bounded,
    UntilSuccess,
}

impl RetryMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "bounded" => Some(Self::Bounded),
            "until_success" | "until-success" | "unbounded" => Some(Self::UntilSuccess),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bounded => "bounded",
            Self::UntilSuccess => "until_success",
        }
    }
}

/// Attempt budget and backoff curve of one logical operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub mode: RetryMode,
    pub max_attempts: u32,
    pub backoff_step: Duration,
    pub backoff_cap: Duration,
    /// Whether an attempt that ends in a successful proxy refresh is counted
    pub refresh_consumes_attempt: bool,
    /// Uncounted refreshes allowed per invocation
    pub max_free_refreshes: u32,
}

impl RetryPolicy {
    /// `min(attempt * 2s, 30s)` backoff; every attempt counts
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            mode: RetryMode::Bounded,
            max_attempts: max_attempts.max(1),
            backoff_step: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(30),
            refresh_consumes_attempt: true,
            max_free_refreshes: 0,
        }
    }

    /// `min(attempt * 3s, 60s)` backoff; attempts rescued by a proxy refresh
    /// are free, up to `max_attempts` of them
    pub fn until_success(max_attempts: u32) -> Self {
        let max_attempts = max_attempts.max(1);
        Self {
            mode: RetryMode::UntilSuccess,
            max_attempts,
            backoff_step: Duration::from_secs(3),
            backoff_cap: Duration::from_secs(60),
            refresh_consumes_attempt: false,
            max_free_refreshes: max_attempts,
        }
    }

    pub fn for_mode(mode: RetryMode, engine: &EngineConfig) -> Self {
        match mode {
            RetryMode::Bounded => Self::bounded(engine.bounded_max_attempts),
            RetryMode::UntilSuccess => Self::until_success(engine.unbounded_max_attempts),
        }
    }

    /// Pause after the `attempt`-th counted failure (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step
            .saturating_mul(attempt)
            .min(self.backoff_cap)
    }
}
