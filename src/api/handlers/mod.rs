//! API request handlers

pub mod accounts;
pub mod health;
pub mod proxy;
pub mod task;
