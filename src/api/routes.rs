//! API route definitions

use axum::routing::{delete, get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Batch runs
        .route("/task_status", get(handlers::task::task_status))
        .route("/manual_task", post(handlers::task::manual_task))
        .route("/status", get(handlers::task::account_status))
        // Proxies
        .route("/proxy_status", get(handlers::proxy::proxy_status))
        .route("/account_proxies", get(handlers::proxy::account_proxies))
        .route("/update_proxy", post(handlers::proxy::update_proxy))
        // Accounts
        .route(
            "/accounts",
            get(handlers::accounts::list_accounts).post(handlers::accounts::create_account),
        )
        .route(
            "/accounts/:account",
            delete(handlers::accounts::delete_account).put(handlers::accounts::update_account),
        )
}
