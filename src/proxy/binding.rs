//! Per-account proxy binding
//!
//! Every account owns exactly one proxy copy, acquired straight from the
//! provider and never shared with the pool or with other accounts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::source::ProxySource;
use crate::error::Result;
use crate::models::{AccountProxyEntry, ProxyRecord};
use crate::storage::{keys, Store};

pub struct AccountProxyBinding {
    store: Store,
    source: Arc<dyn ProxySource>,
    entries: Mutex<BTreeMap<String, AccountProxyEntry>>,
    fail_threshold: u32,
}

impl AccountProxyBinding {
    /// Load persisted bindings
    pub async fn load(
        store: Store,
        source: Arc<dyn ProxySource>,
        fail_threshold: u32,
    ) -> Result<Self> {
        let entries: BTreeMap<String, AccountProxyEntry> =
            store.load_json_or_default(keys::ACCOUNT_PROXIES).await?;
        info!(count = entries.len(), "Loaded account proxy bindings");

        Ok(Self {
            store,
            source,
            entries: Mutex::new(entries),
            fail_threshold,
        })
    }

    /// Persist `next`, then make it the live map; a failed save leaves
    /// memory as it was
    async fn commit(
        &self,
        entries: &mut BTreeMap<String, AccountProxyEntry>,
        next: BTreeMap<String, AccountProxyEntry>,
    ) -> Result<()> {
        self.store.save_json(keys::ACCOUNT_PROXIES, &next).await?;
        *entries = next;
        Ok(())
    }

    /// Proxy bound to `account_id`, acquiring a new one when the binding is
    /// missing or no longer valid
    #[instrument(skip(self))]
    pub async fn resolve(&self, account_id: &str) -> Result<Option<ProxyRecord>> {
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(account_id) {
                if entry.is_valid(self.fail_threshold) {
                    return Ok(Some(entry.bound_proxy.clone()));
                }
                debug!(
                    fail_count = entry.fail_count,
                    "Binding invalid, acquiring a new proxy"
                );
            }
        }
        self.refresh(account_id).await
    }

    /// Replace the account's proxy with a freshly acquired one
    ///
    /// When acquisition fails the previous entry is left untouched.
    #[instrument(skip(self))]
    pub async fn refresh(&self, account_id: &str) -> Result<Option<ProxyRecord>> {
        // Acquire without holding the lock; acquisition is two network calls.
        let record = match self.source.acquire().await {
            Ok(record) => record,
            Err(e) => {
                warn!("Proxy acquisition failed: {}", e);
                return Ok(None);
            }
        };

        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(
            account_id.to_string(),
            AccountProxyEntry::new(account_id, record.clone()),
        );
        self.commit(&mut entries, next).await?;

        info!(proxy = %record.address(), "Bound new proxy");
        Ok(Some(record))
    }

    pub async fn report_success(&self, account_id: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        let Some(entry) = next.get_mut(account_id) else {
            return Ok(());
        };
        entry.fail_count = 0;
        entry.last_success = Some(Utc::now());
        self.commit(&mut entries, next).await
    }

    /// Count a failure; invalidation takes effect on the next `resolve`
    pub async fn report_failure(&self, account_id: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        let Some(entry) = next.get_mut(account_id) else {
            return Ok(());
        };
        entry.fail_count = entry.fail_count.saturating_add(1);
        debug!(
            account = account_id,
            fail_count = entry.fail_count,
            "Binding failure recorded"
        );
        self.commit(&mut entries, next).await
    }

    /// Drop the account's binding; returns whether one existed
    pub async fn remove(&self, account_id: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        if next.remove(account_id).is_none() {
            return Ok(false);
        }
        self.commit(&mut entries, next).await?;
        Ok(true)
    }

    pub async fn get(&self, account_id: &str) -> Option<AccountProxyEntry> {
        self.entries.lock().await.get(account_id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<AccountProxyEntry> {
        self.entries.lock().await.values().cloned().collect()
    }

    pub fn fail_threshold(&self) -> u32 {
        self.fail_threshold
    }
}
