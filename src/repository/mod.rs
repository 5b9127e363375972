//! Persistent registries backed by the key-value store

pub mod accounts;
pub mod status;

pub use accounts::AccountRepository;
pub use status::StatusRepository;
