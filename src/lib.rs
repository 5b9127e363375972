//! Autosign - Proxy-bound daily check-in automation
//!
//! Runs a daily batch of login, check-in, balance and withdraw operations
//! for a set of accounts against a remote service.
//!
//! ## Features
//!
//! - Dedicated proxy per account, replaced when it keeps failing
//! - Shared proxy pool fed from an upstream provider with liveness probing
//! - Bounded and retry-until-success policies with backoff and direct fallback
//! - Crash-safe JSON file persistence
//! - Status API for run counters, account status and proxy health

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod services;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{AutosignError, Result};
