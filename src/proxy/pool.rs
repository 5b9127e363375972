//! Shared proxy pool
//!
//! Holds every proxy the provider has handed out, their health counters
//! and the selection policy. Records are never removed by health logic,
//! only disabled.

use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::source::ProxySource;
use crate::error::Result;
use crate::models::ProxyRecord;
use crate::storage::{keys, Store};

/// Pool totals for status display
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub disabled: usize,
}

pub struct ProxyPool {
    store: Store,
    records: Mutex<Vec<ProxyRecord>>,
    disable_threshold: u32,
}

impl ProxyPool {
    /// Load the persisted pool
    pub async fn load(store: Store, disable_threshold: u32) -> Result<Self> {
        let records: Vec<ProxyRecord> = store.load_json_or_default(keys::PROXY_POOL).await?;
        info!(count = records.len(), "Loaded proxy pool");

        Ok(Self {
            store,
            records: Mutex::new(records),
            disable_threshold,
        })
    }

    /// Persist `next`, then make it the live set; a failed save leaves
    /// memory as it was
    async fn commit(&self, records: &mut Vec<ProxyRecord>, next: Vec<ProxyRecord>) -> Result<()> {
        self.store.save_json(keys::PROXY_POOL, &next).await?;
        *records = next;
        Ok(())
    }

    /// Add a record; an existing record for the same endpoint is replaced
    pub async fn add(&self, record: ProxyRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        match next.iter_mut().find(|r| r.same_endpoint(&record)) {
            Some(existing) => *existing = record,
            None => next.push(record),
        }
        self.commit(&mut records, next).await
    }

    /// Pick an enabled, non-local proxy from the healthier half of the pool
    ///
    /// Returns `None` when nothing is eligible; the caller decides whether
    /// to replenish.
    pub async fn select(&self) -> Result<Option<ProxyRecord>> {
        let mut records = self.records.lock().await;

        let mut candidates: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled && !r.is_local())
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            debug!("No eligible proxy in pool");
            return Ok(None);
        }

        candidates.sort_by_key(|&i| records[i].consecutive_failure_count);
        let half = (candidates.len() / 2).max(1);

        let chosen = {
            let mut rng = rand::thread_rng();
            candidates[..half].choose(&mut rng).copied()
        };
        let Some(chosen) = chosen else {
            return Ok(None);
        };

        let mut next = records.clone();
        next[chosen].last_used = Some(Utc::now());
        let selected = next[chosen].clone();
        self.commit(&mut records, next).await?;

        Ok(Some(selected))
    }

    /// Record the outcome of using `record`
    pub async fn report_outcome(&self, record: &ProxyRecord, success: bool) -> Result<()> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let Some(entry) = next.iter_mut().find(|r| r.same_endpoint(record)) else {
            debug!(proxy = %record.address(), "Outcome reported for unknown proxy");
            return Ok(());
        };

        if success {
            entry.record_success();
        } else {
            entry.record_failure(self.disable_threshold);
            if !entry.enabled {
                warn!(
                    proxy = %entry.address(),
                    failures = entry.consecutive_failure_count,
                    "Proxy disabled"
                );
            }
        }
        self.commit(&mut records, next).await
    }

    /// Acquire from `source` until one proxy is added or `max_tries` is spent
    #[instrument(skip(self, source))]
    pub async fn replenish(
        &self,
        source: &dyn ProxySource,
        max_tries: u32,
        pause: Duration,
    ) -> Result<Option<ProxyRecord>> {
        for attempt in 1..=max_tries {
            match source.acquire().await {
                Ok(record) => {
                    self.add(record.clone()).await?;
                    info!(proxy = %record.address(), attempt, "Pool replenished");
                    return Ok(Some(record));
                }
                Err(e) => {
                    warn!(attempt, max_tries, "Pool replenish attempt failed: {}", e);
                    if attempt < max_tries {
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
        Ok(None)
    }

    pub async fn snapshot(&self) -> Vec<ProxyRecord> {
        self.records.lock().await.clone()
    }

    pub async fn stats(&self) -> PoolStats {
        let records = self.records.lock().await;
        let available = records.iter().filter(|r| r.enabled).count();
        PoolStats {
            total: records.len(),
            available,
            disabled: records.len() - available,
        }
    }
}
