//! Proxy acquisition, pooling and per-account binding

pub mod binding;
pub mod parser;
pub mod pool;
pub mod resolver;
pub mod source;

pub use binding::AccountProxyBinding;
pub use parser::parse_provider_response;
pub use pool::{PoolStats, ProxyPool};
pub use resolver::{DirectResolver, ProxyResolver};
pub use source::{ProviderProxySource, ProxySource};
