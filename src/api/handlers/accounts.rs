//! Account registry handlers

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::{info, warn};

use crate::api::server::AppState;
use crate::error::AutosignError;
use crate::models::{Account, AccountSummary, CreateAccountRequest, UpdateAccountRequest};

/// List registered accounts without passwords
pub async fn list_accounts(State(state): State<AppState>) -> impl IntoResponse {
    let accounts: Vec<AccountSummary> = state
        .accounts
        .list()
        .await
        .iter()
        .map(AccountSummary::from)
        .collect();
    Json(accounts)
}

/// Register an account
pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, AutosignError> {
    if req.password.is_empty() {
        return Err(AutosignError::InvalidRequest("password is required".into()));
    }

    let mut account = Account::new(req.account, req.password);
    if let Some(enabled) = req.enabled {
        account.enabled = enabled;
    }
    state.accounts.add(account.clone()).await?;

    let summary = match state.accounts.get(account.account.trim()).await {
        Some(stored) => AccountSummary::from(&stored),
        None => AccountSummary::from(&account),
    };
    info!(account = %summary.account, "Account registered");

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Enable or disable an account
pub async fn update_account(
    State(state): State<AppState>,
    Path(account): Path<String>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<impl IntoResponse, AutosignError> {
    let updated = state.accounts.set_enabled(&account, req.enabled).await?;
    info!(account = %account, enabled = req.enabled, "Account updated");
    Ok(Json(AccountSummary::from(&updated)))
}

/// Remove an account along with its proxy binding and run status
pub async fn delete_account(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<impl IntoResponse, AutosignError> {
    state.accounts.remove(&account).await?;

    if let Some(binding) = &state.binding {
        if !binding.remove(&account).await? {
            warn!(account = %account, "Deleted account had no proxy binding");
        }
    }
    state.statuses.remove(&account).await?;

    info!(account = %account, "Account deleted");
    Ok(StatusCode::NO_CONTENT)
}
