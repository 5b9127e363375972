//! Batch run handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::api::server::AppState;
use crate::client::RetryMode;
use crate::error::AutosignError;

/// Optional body of a manual trigger
#[derive(Debug, Default, Deserialize)]
pub struct ManualTaskRequest {
    /// `bounded` or `until_success`
    #[serde(default)]
    pub retry_mode: Option<String>,
    /// Shorthand for `retry_mode = until_success`
    #[serde(default)]
    pub retry_until_success: Option<bool>,
}

impl ManualTaskRequest {
    fn mode(&self) -> Result<Option<RetryMode>, AutosignError> {
        if let Some(raw) = &self.retry_mode {
            return RetryMode::from_str(raw).map(Some).ok_or_else(|| {
                AutosignError::InvalidRequest(format!("unknown retry_mode: {}", raw))
            });
        }
        Ok(self.retry_until_success.map(|until_success| {
            if until_success {
                RetryMode::UntilSuccess
            } else {
                RetryMode::Bounded
            }
        }))
    }
}

/// Counters of the current or most recent run
pub async fn task_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.counters())
}

/// Start a run now; 409 while another run holds the slot
pub async fn manual_task(
    State(state): State<AppState>,
    body: Option<Json<ManualTaskRequest>>,
) -> Result<impl IntoResponse, AutosignError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let mode = state.orchestrator.trigger(request.mode()?)?;
    info!(mode = mode.as_str(), "Manual batch triggered");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "ok",
            "msg": "batch started",
            "retry_mode": mode,
        })),
    ))
}

/// Latest run status keyed by account id
pub async fn account_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.statuses.all().await)
}
