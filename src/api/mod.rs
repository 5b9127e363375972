//! API server implementation
//!
//! Read-only status endpoints plus account management and manual triggers.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
