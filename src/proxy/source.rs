//! Upstream proxy provider
//!
//! One acquisition is one provider GET followed by one liveness probe
//! through the candidate.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};

use super::parser::parse_with_strategy;
use crate::client::build_http_client;
use crate::config::ProviderConfig;
use crate::error::{AcquireError, AutosignError, Result};
use crate::models::ProxyRecord;

/// Source of fresh, probed proxies
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Fetch one candidate and verify it forwards traffic
    async fn acquire(&self) -> std::result::Result<ProxyRecord, AcquireError>;
}

/// HTTP provider answering with a single proxy per request
pub struct ProviderProxySource {
    client: Client,
    url: String,
    params: Vec<(String, String)>,
    probe_url: String,
    probe_timeout: Duration,
}

impl ProviderProxySource {
    /// Build a source for `config`; `None` when no provider URL is configured
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>> {
        match config.url.as_deref() {
            Some(url) => Self::new(url, config).map(Some),
            None => Ok(None),
        }
    }

    pub fn new(url: &str, config: &ProviderConfig) -> Result<Self> {
        let client = build_http_client(None, config.fetch_timeout)
            .map_err(|e| AutosignError::InvalidConfig(format!("provider client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            params: config.params.clone(),
            probe_url: config.probe_url.clone(),
            probe_timeout: config.probe_timeout,
        })
    }

    async fn fetch(&self) -> std::result::Result<String, AcquireError> {
        let response = self
            .client
            .get(&self.url)
            .query(&self.params)
            .send()
            .await
            .map_err(|e| AcquireError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Network(format!(
                "provider answered HTTP {}",
                status.as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AcquireError::Network(e.to_string()))
    }

    /// GET the echo endpoint through `record`; only HTTP 200 passes
    pub async fn probe(&self, record: &ProxyRecord) -> std::result::Result<(), AcquireError> {
        let failed = |reason: String| AcquireError::ProbeFailed {
            proxy: record.address(),
            reason,
        };

        let client = build_http_client(Some(record), self.probe_timeout)
            .map_err(|e| failed(e.to_string()))?;

        let response = client
            .get(&self.probe_url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            other => Err(failed(format!("HTTP {}", other.as_u16()))),
        }
    }
}

#[async_trait]
impl ProxySource for ProviderProxySource {
    #[instrument(skip(self), fields(provider = %self.url))]
    async fn acquire(&self) -> std::result::Result<ProxyRecord, AcquireError> {
        let body = self.fetch().await?;

        let (strategy, record) = parse_with_strategy(&body).ok_or_else(|| {
            let preview: String = body.chars().take(120).collect();
            AcquireError::Unparseable(preview)
        })?;
        debug!(strategy, proxy = %record.address(), "Parsed provider response");

        if let Err(e) = self.probe(&record).await {
            warn!(proxy = %record.address(), "Discarding candidate: {}", e);
            return Err(e);
        }

        info!(proxy = %record.address(), "Acquired proxy");
        Ok(record)
    }
}
