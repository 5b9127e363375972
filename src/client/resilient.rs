//! Resilient request execution
//!
//! Runs one logical operation for one account through its bound proxy,
//! refreshing the proxy on connection failures, falling back to a direct
//! connection when no replacement can be acquired, and backing off between
//! counted attempts.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::operation::Operation;
use super::outcome::{FailureReason, RequestOutcome, ResponsePayload};
use super::retry::RetryPolicy;
use super::transport::{RemoteTransport, TransportError};
use crate::error::Result;
use crate::models::ProxyRecord;
use crate::proxy::ProxyResolver;

/// States an invocation moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Attempting,
    RetryWait,
    ProxyRefreshing,
    DirectFallback,
    Succeeded,
    TerminalRejected,
    ExhaustedRetries,
    Cancelled,
}

/// Result of [`ResilientClient::execute`]
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: RequestOutcome,
    /// Attempts counted against the policy budget
    pub attempts: u32,
    /// Remote calls actually issued, including direct fallbacks
    pub requests: u32,
    pub final_state: ExecutionState,
    /// Proxy used by the last call, `None` when it went direct
    pub last_proxy: Option<ProxyRecord>,
}

impl ExecutionReport {
    pub fn payload(&self) -> Option<&ResponsePayload> {
        self.outcome.payload()
    }
}

/// Per-invocation bookkeeping
struct Attempt {
    attempts: u32,
    requests: u32,
    free_refreshes: u32,
}

impl Attempt {
    fn finish(
        &self,
        outcome: RequestOutcome,
        final_state: ExecutionState,
        last_proxy: Option<ProxyRecord>,
    ) -> ExecutionReport {
        ExecutionReport {
            outcome,
            attempts: self.attempts,
            requests: self.requests,
            final_state,
            last_proxy,
        }
    }
}

#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn RemoteTransport>,
    resolver: Arc<dyn ProxyResolver>,
    shutdown: watch::Receiver<bool>,
}

impl ResilientClient {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        resolver: Arc<dyn ProxyResolver>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            resolver,
            shutdown,
        }
    }

    pub fn resolver(&self) -> &Arc<dyn ProxyResolver> {
        &self.resolver
    }

    /// Issue one call and classify it
    async fn call(
        &self,
        operation: &Operation,
        proxy: Option<&ProxyRecord>,
    ) -> std::result::Result<ResponsePayload, FailureReason> {
        let request = operation.request();
        let response = self
            .transport
            .send(&request, proxy)
            .await
            .map_err(|e| match e {
                TransportError::ProxyConnect(message) => {
                    FailureReason::ProxyConnectFailure { message }
                }
                TransportError::Timeout => FailureReason::Timeout,
                TransportError::Network(message) => FailureReason::NetworkError { message },
            })?;
        operation.evaluate(&response)
    }

    /// Run `operation` for `account_id` under `policy`
    ///
    /// Never fails because of the remote side: exhaustion, rejection and
    /// cancellation are all reported through [`ExecutionReport`]. Only
    /// storage errors from the resolver propagate.
    #[instrument(skip(self, operation, policy), fields(op = operation.name(), mode = policy.mode.as_str()))]
    pub async fn execute(
        &self,
        account_id: &str,
        operation: &Operation,
        policy: &RetryPolicy,
    ) -> Result<ExecutionReport> {
        let mut shutdown = self.shutdown.clone();
        let mut state = Attempt {
            attempts: 0,
            requests: 0,
            free_refreshes: 0,
        };
        let mut proxy = self.resolver.resolve_proxy(account_id).await?;

        loop {
            if *shutdown.borrow() {
                info!(account = account_id, "Shutdown observed, abandoning operation");
                return Ok(state.finish(
                    RequestOutcome::RetryableFailure(FailureReason::Cancelled),
                    ExecutionState::Cancelled,
                    proxy,
                ));
            }

            state.attempts += 1;
            state.requests += 1;
            debug!(
                account = account_id,
                state = ?ExecutionState::Attempting,
                attempt = state.attempts,
                proxy = %describe(proxy.as_ref()),
            );

            let mut reason = match self.call(operation, proxy.as_ref()).await {
                Ok(payload) => {
                    if proxy.is_some() {
                        self.resolver.mark_success(account_id).await?;
                    }
                    return Ok(state.finish(
                        RequestOutcome::Success(payload),
                        ExecutionState::Succeeded,
                        proxy,
                    ));
                }
                Err(reason) => {
                    if proxy.is_some() {
                        self.resolver.mark_failure(account_id).await?;
                    }
                    if reason.is_terminal() {
                        warn!(account = account_id, "{} rejected: {}", operation.name(), reason);
                        return Ok(state.finish(
                            RequestOutcome::TerminalFailure(reason),
                            ExecutionState::TerminalRejected,
                            proxy,
                        ));
                    }
                    warn!(
                        account = account_id,
                        "{} failed via {}: {} (attempt {}/{})",
                        operation.name(),
                        describe(proxy.as_ref()),
                        reason,
                        state.attempts,
                        policy.max_attempts
                    );
                    reason
                }
            };

            if reason.is_proxy_failure() {
                debug!(account = account_id, state = ?ExecutionState::ProxyRefreshing);
                match self.resolver.refresh_proxy(account_id).await? {
                    Some(fresh) => {
                        info!(account = account_id, proxy = %fresh.address(), "Switched to refreshed proxy");
                        proxy = Some(fresh);
                        if !policy.refresh_consumes_attempt
                            && state.free_refreshes < policy.max_free_refreshes
                        {
                            state.free_refreshes += 1;
                            state.attempts -= 1;
                            continue;
                        }
                    }
                    None => {
                        debug!(account = account_id, state = ?ExecutionState::DirectFallback);
                        state.requests += 1;
                        match self.call(operation, None).await {
                            Ok(payload) => {
                                info!(account = account_id, "{} succeeded over direct connection", operation.name());
                                return Ok(state.finish(
                                    RequestOutcome::Success(payload),
                                    ExecutionState::Succeeded,
                                    None,
                                ));
                            }
                            Err(direct) if direct.is_terminal() => {
                                return Ok(state.finish(
                                    RequestOutcome::TerminalFailure(direct),
                                    ExecutionState::TerminalRejected,
                                    None,
                                ));
                            }
                            Err(direct) => {
                                warn!(account = account_id, "Direct fallback failed: {}", direct);
                                reason = direct;
                            }
                        }
                    }
                }
            }

            if state.attempts >= policy.max_attempts {
                warn!(
                    account = account_id,
                    "{} gave up after {} attempts: {}",
                    operation.name(),
                    state.attempts,
                    reason
                );
                return Ok(state.finish(
                    RequestOutcome::RetryableFailure(reason),
                    ExecutionState::ExhaustedRetries,
                    proxy,
                ));
            }

            let delay = policy.backoff(state.attempts);
            debug!(account = account_id, state = ?ExecutionState::RetryWait, delay_secs = delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    info!(account = account_id, "Shutdown during backoff");
                    return Ok(state.finish(
                        RequestOutcome::RetryableFailure(FailureReason::Cancelled),
                        ExecutionState::Cancelled,
                        proxy,
                    ));
                }
            }

            proxy = self.resolver.resolve_proxy(account_id).await?;
        }
    }
}

fn describe(proxy: Option<&ProxyRecord>) -> String {
    proxy
        .map(|p| p.address())
        .unwrap_or_else(|| "direct".to_string())
}

/// Resolves once shutdown is signalled; pends forever if the sender is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
