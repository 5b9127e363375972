//! Proxy resolution seen from the request client

use async_trait::async_trait;

use super::binding::AccountProxyBinding;
use crate::error::Result;
use crate::models::ProxyRecord;

/// Capability the request client uses to route an account's traffic
///
/// `None` from `resolve_proxy`/`refresh_proxy` means "connect directly".
#[async_trait]
pub trait ProxyResolver: Send + Sync {
    async fn resolve_proxy(&self, account_id: &str) -> Result<Option<ProxyRecord>>;

    async fn refresh_proxy(&self, account_id: &str) -> Result<Option<ProxyRecord>>;

    async fn mark_success(&self, account_id: &str) -> Result<()>;

    async fn mark_failure(&self, account_id: &str) -> Result<()>;

    fn name(&self) -> &'static str;
}

#[async_trait]
impl ProxyResolver for AccountProxyBinding {
    async fn resolve_proxy(&self, account_id: &str) -> Result<Option<ProxyRecord>> {
        self.resolve(account_id).await
    }

    async fn refresh_proxy(&self, account_id: &str) -> Result<Option<ProxyRecord>> {
        self.refresh(account_id).await
    }

    async fn mark_success(&self, account_id: &str) -> Result<()> {
        self.report_success(account_id).await
    }

    async fn mark_failure(&self, account_id: &str) -> Result<()> {
        self.report_failure(account_id).await
    }

    fn name(&self) -> &'static str {
        "account_binding"
    }
}

/// Resolver used when no provider is configured: every request goes direct
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectResolver;

#[async_trait]
impl ProxyResolver for DirectResolver {
    async fn resolve_proxy(&self, _account_id: &str) -> Result<Option<ProxyRecord>> {
        Ok(None)
    }

    async fn refresh_proxy(&self, _account_id: &str) -> Result<Option<ProxyRecord>> {
        Ok(None)
    }

    async fn mark_success(&self, _account_id: &str) -> Result<()> {
        Ok(())
    }

    async fn mark_failure(&self, _account_id: &str) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
