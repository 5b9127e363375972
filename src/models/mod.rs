//! Domain models

pub mod account;
pub mod proxy;
pub mod status;

pub use account::*;
pub use proxy::*;
pub use status::*;
