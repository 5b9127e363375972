use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{AutosignError, Result};
use crate::models::Account;
use crate::storage::{keys, Store};

/// Registered accounts, persisted as one list
pub struct AccountRepository {
    store: Store,
    accounts: Mutex<Vec<Account>>,
}

impl AccountRepository {
    pub async fn load(store: Store) -> Result<Self> {
        let accounts: Vec<Account> = store.load_json_or_default(keys::ACCOUNTS).await?;
        info!(count = accounts.len(), "Loaded accounts");
        Ok(Self {
            store,
            accounts: Mutex::new(accounts),
        })
    }

    /// Persist `next`, then make it the live list
    async fn commit(&self, accounts: &mut Vec<Account>, next: Vec<Account>) -> Result<()> {
        self.store.save_json(keys::ACCOUNTS, &next).await?;
        *accounts = next;
        Ok(())
    }

    pub async fn list(&self) -> Vec<Account> {
        self.accounts.lock().await.clone()
    }

    pub async fn list_enabled(&self) -> Vec<Account> {
        self.accounts
            .lock()
            .await
            .iter()
            .filter(|a| a.enabled)
            .cloned()
            .collect()
    }

    pub async fn get(&self, account: &str) -> Option<Account> {
        self.accounts
            .lock()
            .await
            .iter()
            .find(|a| a.account == account)
            .cloned()
    }

    pub async fn add(&self, mut account: Account) -> Result<()> {
        account.account = account.account.trim().to_string();
        if account.account.is_empty() || account.password.is_empty() {
            return Err(AutosignError::InvalidRequest(
                "account and password are required".to_string(),
            ));
        }

        let mut accounts = self.accounts.lock().await;
        if accounts.iter().any(|a| a.account == account.account) {
            return Err(AutosignError::AccountExists(account.account));
        }
        let mut next = accounts.clone();
        next.push(account);
        self.commit(&mut accounts, next).await
    }

    pub async fn remove(&self, account: &str) -> Result<Account> {
        let mut accounts = self.accounts.lock().await;
        let index = accounts
            .iter()
            .position(|a| a.account == account)
            .ok_or_else(|| AutosignError::AccountNotFound(account.to_string()))?;
        let mut next = accounts.clone();
        let removed = next.remove(index);
        self.commit(&mut accounts, next).await?;
        Ok(removed)
    }

    pub async fn set_enabled(&self, account: &str, enabled: bool) -> Result<Account> {
        self.update(account, |a| a.enabled = enabled).await
    }

    /// Stamp the date of the last successful login
    pub async fn record_login(&self, account: &str, date: NaiveDate) -> Result<()> {
        match self.update(account, |a| a.last_login_date = Some(date)).await {
            // Deleted while its batch was running.
            Err(AutosignError::AccountNotFound(_)) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn update(&self, account: &str, apply: impl FnOnce(&mut Account)) -> Result<Account> {
        let mut accounts = self.accounts.lock().await;
        let mut next = accounts.clone();
        let entry = next
            .iter_mut()
            .find(|a| a.account == account)
            .ok_or_else(|| AutosignError::AccountNotFound(account.to_string()))?;
        apply(entry);
        let updated = entry.clone();
        self.commit(&mut accounts, next).await?;
        Ok(updated)
    }
}
