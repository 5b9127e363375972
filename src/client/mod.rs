//! Remote service client
//!
//! Operations are classified into success, retryable failure and terminal
//! rejection, then retried through the account's proxy under a
//! [`RetryPolicy`].

pub mod operation;
pub mod outcome;
pub mod resilient;
pub mod retry;
pub mod transport;

pub use operation::Operation;
pub use outcome::{FailureReason, RequestOutcome, ResponsePayload};
pub use resilient::{ExecutionReport, ExecutionState, ResilientClient};
pub use retry::{RetryMode, RetryPolicy};
pub use transport::{
    build_http_client, HttpTransport, RemoteRequest, RemoteResponse, RemoteTransport,
    TransportError,
};
