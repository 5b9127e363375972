use std::collections::BTreeMap;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::AccountRunStatus;
use crate::storage::{keys, Store};

/// Latest run status per account
pub struct StatusRepository {
    store: Store,
    statuses: Mutex<BTreeMap<String, AccountRunStatus>>,
}

impl StatusRepository {
    pub async fn load(store: Store) -> Result<Self> {
        let statuses = store.load_json_or_default(keys::STATUS).await?;
        Ok(Self {
            store,
            statuses: Mutex::new(statuses),
        })
    }

    /// Replace the account's status and persist the whole map
    pub async fn record(&self, account: &str, status: AccountRunStatus) -> Result<()> {
        let mut statuses = self.statuses.lock().await;
        let mut next = statuses.clone();
        next.insert(account.to_string(), status);
        self.store.save_json(keys::STATUS, &next).await?;
        *statuses = next;
        Ok(())
    }

    pub async fn get(&self, account: &str) -> Option<AccountRunStatus> {
        self.statuses.lock().await.get(account).cloned()
    }

    pub async fn all(&self) -> BTreeMap<String, AccountRunStatus> {
        self.statuses.lock().await.clone()
    }

    pub async fn remove(&self, account: &str) -> Result<()> {
        let mut statuses = self.statuses.lock().await;
        let mut next = statuses.clone();
        if next.remove(account).is_some() {
            self.store.save_json(keys::STATUS, &next).await?;
            *statuses = next;
        }
        Ok(())
    }
}
