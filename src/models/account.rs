use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ProxyRecord;

/// Remote-service account registered for the daily batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account: String,
    pub password: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_login_date: Option<NaiveDate>,
}

fn default_enabled() -> bool {
    true
}

impl Account {
    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            password: password.into(),
            enabled: true,
            last_login_date: None,
        }
    }
}

/// Account as exposed through the API, without the password
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub account: String,
    pub enabled: bool,
    pub last_login_date: Option<NaiveDate>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            account: account.account.clone(),
            enabled: account.enabled,
            last_login_date: account.last_login_date,
        }
    }
}

/// Request body for registering an account
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountRequest {
    pub account: String,
    pub password: String,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Request body for toggling an account
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAccountRequest {
    pub enabled: bool,
}

/// Dedicated proxy owned by exactly one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProxyEntry {
    pub account_id: String,
    pub bound_proxy: ProxyRecord,
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    pub bound_at: DateTime<Utc>,
}

impl AccountProxyEntry {
    pub fn new(account_id: impl Into<String>, bound_proxy: ProxyRecord) -> Self {
        Self {
            account_id: account_id.into(),
            bound_proxy,
            fail_count: 0,
            last_success: None,
            bound_at: Utc::now(),
        }
    }

    /// Usable while the proxy has an endpoint and the failure count is below `fail_threshold`
    pub fn is_valid(&self, fail_threshold: u32) -> bool {
        self.bound_proxy.has_endpoint() && self.fail_count < fail_threshold
    }
}
