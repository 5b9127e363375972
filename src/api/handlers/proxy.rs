//! Proxy pool and binding handlers

use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::error::AutosignError;
use crate::models::{AccountProxyEntry, ProxyRecord};

const REPLENISH_PAUSE: Duration = Duration::from_secs(2);

/// Proxy as exposed through the API; the password never leaves the process
#[derive(Debug, Serialize)]
pub struct ProxyView {
    pub address: String,
    pub scheme: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub enabled: bool,
    pub consecutive_failure_count: u32,
    pub last_used: Option<DateTime<Utc>>,
}

impl From<&ProxyRecord> for ProxyView {
    fn from(record: &ProxyRecord) -> Self {
        Self {
            address: record.address(),
            scheme: record.scheme.as_str(),
            username: record.credentials.as_ref().map(|c| c.username.clone()),
            enabled: record.enabled,
            consecutive_failure_count: record.consecutive_failure_count,
            last_used: record.last_used,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BindingView {
    pub account_id: String,
    pub proxy: ProxyView,
    pub fail_count: u32,
    pub valid: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub bound_at: DateTime<Utc>,
}

impl BindingView {
    fn new(entry: &AccountProxyEntry, fail_threshold: u32) -> Self {
        Self {
            account_id: entry.account_id.clone(),
            proxy: ProxyView::from(&entry.bound_proxy),
            fail_count: entry.fail_count,
            valid: entry.is_valid(fail_threshold),
            last_success: entry.last_success,
            bound_at: entry.bound_at,
        }
    }
}

async fn binding_views(state: &AppState) -> Vec<BindingView> {
    match &state.binding {
        Some(binding) => binding
            .snapshot()
            .await
            .iter()
            .map(|entry| BindingView::new(entry, binding.fail_threshold()))
            .collect(),
        None => Vec::new(),
    }
}

/// Pool totals, pool members and account bindings
pub async fn proxy_status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.pool.stats().await;
    let proxies: Vec<ProxyView> = state.pool.snapshot().await.iter().map(ProxyView::from).collect();
    let bindings = binding_views(&state).await;
    let resolver = if state.binding.is_some() {
        "account_binding"
    } else {
        "direct"
    };

    Json(json!({
        "resolver": resolver,
        "provider_configured": state.source.is_some(),
        "pool": stats,
        "proxies": proxies,
        "bindings": bindings,
    }))
}

/// Account to proxy bindings
pub async fn account_proxies(State(state): State<AppState>) -> impl IntoResponse {
    Json(binding_views(&state).await)
}

/// Pull a fresh proxy from the provider into the pool
pub async fn update_proxy(State(state): State<AppState>) -> Result<impl IntoResponse, AutosignError> {
    let source = state
        .source
        .as_ref()
        .ok_or_else(|| AutosignError::InvalidRequest("no proxy provider configured".into()))?;

    let added = state
        .pool
        .replenish(source.as_ref(), state.replenish_tries.max(1), REPLENISH_PAUSE)
        .await?
        .ok_or(AutosignError::NoProxiesAvailable)?;

    info!(proxy = %added.address(), "Proxy pool updated on request");
    Ok(Json(json!({
        "status": "ok",
        "proxy": ProxyView::from(&added),
    })))
}
