use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one account's daily run, persisted under the account id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRunStatus {
    pub date: NaiveDate,
    pub signed: bool,
    pub sign_msg: String,
    pub balance: f64,
    pub withdraw_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl AccountRunStatus {
    /// Status of an account whose login never produced a session
    pub fn failed(date: NaiveDate, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            date,
            signed: false,
            sign_msg: error.clone(),
            balance: 0.0,
            withdraw_status: String::new(),
            last_error: Some(error),
        }
    }
}

/// Counters of the current or most recent batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub total_accounts: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub is_running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}
