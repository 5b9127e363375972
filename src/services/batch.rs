//! Daily batch over all enabled accounts
//!
//! Per account: login, check-in, balance query and, when there is a
//! balance, withdrawal. Every step goes through the account's own proxy.
//! Only storage failures abort a batch; remote failures are counted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::client::{
    ExecutionReport, ExecutionState, Operation, ResilientClient, RetryMode, RetryPolicy,
};
use crate::config::{Config, EngineConfig};
use crate::error::{AutosignError, Result};
use crate::models::{Account, AccountRunStatus, RunCounters};
use crate::proxy::{ProxyPool, ProxySource};
use crate::repository::{AccountRepository, StatusRepository};

const NO_BALANCE: &str = "no balance";

/// Knobs of a batch run
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Policy of scheduled runs and of triggers that name no mode
    pub policy: RetryPolicy,
    /// Attempt budgets for a mode chosen per trigger
    pub engine: EngineConfig,
    /// Accounts processed at the same time
    pub concurrency: usize,
    pub coin_type: String,
    pub withdraw_password: String,
    /// Provider attempts spent topping up the pool before the run
    pub pool_topup_tries: u32,
    pub topup_pause: Duration,
}

impl BatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: RetryPolicy::for_mode(config.schedule.retry_mode, &config.engine),
            engine: config.engine.clone(),
            concurrency: config.schedule.concurrency.max(1),
            coin_type: config.remote.coin_type.clone(),
            withdraw_password: config.remote.withdraw_password.clone(),
            pool_topup_tries: config.schedule.pool_topup_tries,
            topup_pause: Duration::from_secs(2),
        }
    }

    /// Policy for `mode`, falling back to the configured one
    pub fn policy_for(&self, mode: Option<RetryMode>) -> RetryPolicy {
        match mode {
            Some(mode) if mode != self.policy.mode => RetryPolicy::for_mode(mode, &self.engine),
            _ => self.policy.clone(),
        }
    }
}

/// How one account's turn in a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountProgress {
    Processed,
    /// Already signed in today
    Skipped,
    /// Shutdown arrived mid-account; nothing was recorded
    Cancelled,
}

fn cancelled(report: &ExecutionReport) -> bool {
    report.final_state == ExecutionState::Cancelled
}

/// Clears the running flag when the batch ends, however it ends
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct BatchOrchestrator {
    client: ResilientClient,
    accounts: Arc<AccountRepository>,
    statuses: Arc<StatusRepository>,
    pool: Arc<ProxyPool>,
    source: Option<Arc<dyn ProxySource>>,
    settings: BatchSettings,
    running: Arc<AtomicBool>,
    counters: RwLock<RunCounters>,
}

impl BatchOrchestrator {
    pub fn new(
        client: ResilientClient,
        accounts: Arc<AccountRepository>,
        statuses: Arc<StatusRepository>,
        pool: Arc<ProxyPool>,
        source: Option<Arc<dyn ProxySource>>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            client,
            accounts,
            statuses,
            pool,
            source,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            counters: RwLock::new(RunCounters::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Counters of the current or last run
    pub fn counters(&self) -> RunCounters {
        let mut counters = self.counters.read().clone();
        counters.is_running = self.is_running();
        counters
    }

    pub fn set_next_run(&self, next_run: Option<DateTime<Utc>>) {
        self.counters.write().next_run = next_run;
    }

    /// Claim the single run slot
    pub(crate) fn try_claim(&self) -> Result<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AutosignError::BatchAlreadyRunning)?;
        Ok(RunGuard {
            flag: self.running.clone(),
        })
    }

    /// Run over the given accounts; fails fast if a run is in progress
    pub async fn run_batch(&self, accounts: Vec<Account>) -> Result<RunCounters> {
        let guard = self.try_claim()?;
        self.run_claimed(guard, accounts, self.settings.policy.clone()).await
    }

    /// Run over every enabled account
    pub async fn run_enabled(&self) -> Result<RunCounters> {
        let guard = self.try_claim()?;
        let accounts = self.accounts.list_enabled().await;
        self.run_claimed(guard, accounts, self.settings.policy.clone()).await
    }

    /// Start a run in the background; fails fast if one is in progress
    ///
    /// `mode` overrides the configured retry mode for this run only.
    /// Returns the mode the run uses.
    pub fn trigger(self: &Arc<Self>, mode: Option<RetryMode>) -> Result<RetryMode> {
        let guard = self.try_claim()?;
        let policy = self.settings.policy_for(mode);
        let mode = policy.mode;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let accounts = this.accounts.list_enabled().await;
            if let Err(e) = this.run_claimed(guard, accounts, policy).await {
                error!("Manual batch aborted: {}", e);
            }
        });
        Ok(mode)
    }

    #[instrument(
        skip_all,
        fields(run_id = %Uuid::new_v4(), accounts = accounts.len(), mode = policy.mode.as_str())
    )]
    async fn run_claimed(
        &self,
        _guard: RunGuard,
        accounts: Vec<Account>,
        policy: RetryPolicy,
    ) -> Result<RunCounters> {
        {
            let mut counters = self.counters.write();
            counters.total_accounts = accounts.len();
            counters.success_count = 0;
            counters.error_count = 0;
            counters.is_running = true;
            counters.last_run = Some(Utc::now());
        }
        info!("Batch started");

        let result = self.process_all(accounts, &policy).await;

        let counters = {
            let mut counters = self.counters.write();
            counters.is_running = false;
            counters.clone()
        };

        match &result {
            Ok(true) => warn!(
                success = counters.success_count,
                errors = counters.error_count,
                "Batch stopped by shutdown, remaining accounts left untouched"
            ),
            Ok(false) => info!(
                total = counters.total_accounts,
                success = counters.success_count,
                errors = counters.error_count,
                "Batch finished"
            ),
            Err(e) => error!("Batch aborted: {}", e),
        }
        result.map(|_| counters)
    }

    /// Returns whether the run was cut short by shutdown
    async fn process_all(&self, accounts: Vec<Account>, policy: &RetryPolicy) -> Result<bool> {
        self.top_up_pool().await?;

        let mut results = futures::stream::iter(accounts)
            .map(|account| async move { self.process_account(&account, policy).await })
            .buffer_unordered(self.settings.concurrency.max(1));

        while let Some(result) = results.next().await {
            // Dropping the stream stops pulling further accounts.
            if result? == AccountProgress::Cancelled {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn top_up_pool(&self) -> Result<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        if self.settings.pool_topup_tries == 0 {
            return Ok(());
        }
        if self
            .pool
            .replenish(
                source.as_ref(),
                self.settings.pool_topup_tries,
                self.settings.topup_pause,
            )
            .await?
            .is_none()
        {
            warn!("Pool top-up found no usable proxy, continuing with current pool");
        }
        Ok(())
    }

    /// Process one account; remote failures are recorded, storage failures returned
    #[instrument(skip_all, fields(account = %account.account))]
    async fn process_account(
        &self,
        account: &Account,
        policy: &RetryPolicy,
    ) -> Result<AccountProgress> {
        let id = account.account.as_str();
        let today = Local::now().date_naive();

        if self.signed_today(account, today).await {
            info!("Already signed in today, skipping");
            self.counters.write().success_count += 1;
            return Ok(AccountProgress::Skipped);
        }

        let login = self
            .client
            .execute(
                id,
                &Operation::Login {
                    account: id.to_string(),
                    password: account.password.clone(),
                },
                policy,
            )
            .await?;
        if cancelled(&login) {
            return Ok(AccountProgress::Cancelled);
        }

        let Some(token) = login.payload().and_then(|p| p.token()).map(str::to_string) else {
            let message = login.outcome.message();
            warn!(attempts = login.attempts, "Login failed: {}", message);
            self.statuses
                .record(id, AccountRunStatus::failed(today, message))
                .await?;
            self.counters.write().error_count += 1;
            return Ok(AccountProgress::Processed);
        };
        self.accounts.record_login(id, today).await?;

        let check_in = self
            .client
            .execute(id, &Operation::CheckIn { token: token.clone() }, policy)
            .await?;
        if cancelled(&check_in) {
            return Ok(AccountProgress::Cancelled);
        }
        let signed = check_in.outcome.is_success();
        let sign_msg = check_in.outcome.message();

        let balance_report = self
            .client
            .execute(id, &Operation::Balance { token: token.clone() }, policy)
            .await?;
        if cancelled(&balance_report) {
            return Ok(AccountProgress::Cancelled);
        }
        let balance = balance_report
            .payload()
            .map(|p| p.asset_balance(&self.settings.coin_type))
            .unwrap_or(0.0);

        let withdraw_status = if balance > 0.0 {
            let withdraw = self
                .client
                .execute(
                    id,
                    &Operation::Withdraw {
                        token,
                        amount: format_amount(balance),
                        coin_type: self.settings.coin_type.clone(),
                        password: self.settings.withdraw_password.clone(),
                    },
                    policy,
                )
                .await?;
            if cancelled(&withdraw) {
                return Ok(AccountProgress::Cancelled);
            }
            withdraw.outcome.message()
        } else {
            NO_BALANCE.to_string()
        };

        let last_error = check_in
            .outcome
            .failure()
            .or_else(|| balance_report.outcome.failure())
            .map(|reason| reason.to_string());

        info!(signed, balance, withdraw = %withdraw_status, "Account processed");
        self.statuses
            .record(
                id,
                AccountRunStatus {
                    date: today,
                    signed,
                    sign_msg,
                    balance,
                    withdraw_status,
                    last_error,
                },
            )
            .await?;

        let mut counters = self.counters.write();
        if signed {
            counters.success_count += 1;
        } else {
            counters.error_count += 1;
        }
        Ok(AccountProgress::Processed)
    }

    /// Logged in and signed today already; a login without a sign is retried
    async fn signed_today(&self, account: &Account, today: NaiveDate) -> bool {
        if account.last_login_date != Some(today) {
            return false;
        }
        matches!(
            self.statuses.get(&account.account).await,
            Some(status) if status.date == today && status.signed
        )
    }
}

/// Render an amount without a trailing `.0` for whole numbers
fn format_amount(amount: f64) -> String {
    format!("{}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{RemoteRequest, RemoteResponse, TransportError};
    use crate::error::AcquireError;
    use crate::models::ProxyRecord;
    use crate::proxy::DirectResolver;
    use crate::storage::{KeyValueStore, Store};
    use crate::test_support::{FnTransport, ScriptedSource, ScriptedTransport};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::sync::watch;

    fn respond(body: Value) -> std::result::Result<RemoteResponse, TransportError> {
        Ok(RemoteResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    /// Remote where `bob` can never reach the login endpoint and `alice` holds `balance`
    fn remote(
        balance: &'static str,
        withdrawals: Arc<Mutex<Vec<Value>>>,
    ) -> impl Fn(&RemoteRequest, Option<&ProxyRecord>) -> std::result::Result<RemoteResponse, TransportError>
           + Send
           + Sync {
        move |request: &RemoteRequest, _proxy: Option<&ProxyRecord>| match request.path {
            "/api/auth/login" => {
                let body = request.body.clone().unwrap_or_default();
                match body["account"].as_str() {
                    Some("alice") => {
                        respond(json!({"code": 0, "msg": "ok", "data": {"token": "tok-alice"}}))
                    }
                    _ => Err(TransportError::Timeout),
                }
            }
            "/api/user/sign" => respond(json!({"code": 0, "msg": "signed in"})),
            "/api/assets/myAssets" => respond(json!({
                "code": 0,
                "msg": "ok",
                "data": {"coinList": [{"name_en": "income_wallet", "num": balance}]}
            })),
            "/api/assets/withdraw" => {
                withdrawals.lock().push(request.body.clone().unwrap_or_default());
                respond(json!({"code": 0, "msg": "withdrawal submitted"}))
            }
            other => panic!("unexpected path {}", other),
        }
    }

    fn settings() -> BatchSettings {
        BatchSettings {
            policy: RetryPolicy::bounded(3),
            engine: EngineConfig::default(),
            concurrency: 2,
            coin_type: "income_wallet".to_string(),
            withdraw_password: String::new(),
            pool_topup_tries: 1,
            topup_pause: Duration::from_millis(10),
        }
    }

    struct Harness {
        orchestrator: Arc<BatchOrchestrator>,
        accounts: Arc<AccountRepository>,
        statuses: Arc<StatusRepository>,
        pool: Arc<ProxyPool>,
        shutdown: watch::Sender<bool>,
    }

    async fn harness(
        store: Store,
        transport: Arc<dyn crate::client::RemoteTransport>,
        source: Option<Arc<dyn ProxySource>>,
    ) -> Harness {
        let (tx, rx) = watch::channel(false);
        let client = ResilientClient::new(transport, Arc::new(DirectResolver), rx);
        let accounts = Arc::new(AccountRepository::load(store.clone()).await.unwrap());
        let statuses = Arc::new(StatusRepository::load(store.clone()).await.unwrap());
        let pool = Arc::new(ProxyPool::load(store, 5).await.unwrap());
        let orchestrator = Arc::new(BatchOrchestrator::new(
            client,
            accounts.clone(),
            statuses.clone(),
            pool.clone(),
            source,
            settings(),
        ));
        Harness {
            orchestrator,
            accounts,
            statuses,
            pool,
            shutdown: tx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_counts_success_and_exhaustion() {
        let withdrawals = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(FnTransport(remote("0", withdrawals.clone())));
        let h = harness(Store::in_memory(), transport, None).await;

        let counters = h
            .orchestrator
            .run_batch(vec![Account::new("alice", "pw"), Account::new("bob", "pw")])
            .await
            .unwrap();

        assert_eq!(counters.total_accounts, 2);
        assert_eq!(counters.success_count, 1);
        assert_eq!(counters.error_count, 1);
        assert!(!counters.is_running);
        assert!(counters.last_run.is_some());

        let statuses = h.statuses.all().await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses["alice"].signed);
        assert_eq!(statuses["alice"].withdraw_status, NO_BALANCE);
        assert!(!statuses["bob"].signed);
        assert_eq!(statuses["bob"].last_error.as_deref(), Some("request timed out"));
        assert!(withdrawals.lock().is_empty());
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_batch_withdraws_positive_balance_and_stamps_login() {
        let withdrawals = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(FnTransport(remote("12.5", withdrawals.clone())));
        let h = harness(Store::in_memory(), transport, None).await;
        h.accounts.add(Account::new("alice", "pw")).await.unwrap();

        let counters = h.orchestrator.run_enabled().await.unwrap();
        assert_eq!(counters.success_count, 1);

        let status = h.statuses.get("alice").await.unwrap();
        assert_eq!(status.balance, 12.5);
        assert_eq!(status.withdraw_status, "withdrawal submitted");
        assert_eq!(status.sign_msg, "signed in");
        assert!(status.last_error.is_none());

        let withdrawals = withdrawals.lock();
        assert_eq!(withdrawals.len(), 1);
        assert_eq!(withdrawals[0]["num"], "12.5");
        assert_eq!(withdrawals[0]["coin_type"], "income_wallet");

        assert_eq!(
            h.accounts.get("alice").await.unwrap().last_login_date,
            Some(Local::now().date_naive())
        );
    }

    #[tokio::test]
    async fn test_overlapping_run_fails_fast() {
        let transport = Arc::new(FnTransport(remote("0", Arc::new(Mutex::new(Vec::new())))));
        let h = harness(Store::in_memory(), transport, None).await;

        let guard = h.orchestrator.try_claim().unwrap();
        assert!(h.orchestrator.is_running());
        assert!(h.orchestrator.counters().is_running);
        assert!(matches!(
            h.orchestrator.run_batch(vec![]).await,
            Err(AutosignError::BatchAlreadyRunning)
        ));
        assert!(matches!(
            h.orchestrator.trigger(None),
            Err(AutosignError::BatchAlreadyRunning)
        ));

        drop(guard);
        assert!(!h.orchestrator.is_running());
        h.orchestrator.run_batch(vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_tops_up_pool_first() {
        let transport = Arc::new(FnTransport(remote("0", Arc::new(Mutex::new(Vec::new())))));
        let source: Arc<dyn ProxySource> = Arc::new(ScriptedSource::new(vec![Ok(
            ProxyRecord::new("203.0.113.5", 8080),
        )]));
        let h = harness(Store::in_memory(), transport, Some(source)).await;

        h.orchestrator.run_batch(vec![]).await.unwrap();
        assert_eq!(h.pool.stats().await.total, 1);
    }

    struct BrokenDisk;

    #[async_trait]
    impl KeyValueStore for BrokenDisk {
        async fn load(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn save(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_batch() {
        let transport = Arc::new(FnTransport(remote("0", Arc::new(Mutex::new(Vec::new())))));
        let h = harness(Store::new(Arc::new(BrokenDisk)), transport, None).await;

        let result = h
            .orchestrator
            .run_batch(vec![Account::new("alice", "pw")])
            .await;
        assert!(matches!(result, Err(AutosignError::Storage(_))));
        assert!(!h.orchestrator.is_running());
        assert!(!h.orchestrator.counters().is_running);
    }

    #[tokio::test]
    async fn test_unparseable_provider_does_not_abort_batch() {
        let transport = Arc::new(FnTransport(remote("0", Arc::new(Mutex::new(Vec::new())))));
        let source: Arc<dyn ProxySource> = Arc::new(ScriptedSource::new(vec![Err(
            AcquireError::Unparseable("garbage".into()),
        )]));
        let h = harness(Store::in_memory(), transport, Some(source)).await;
        assert!(h.orchestrator.run_batch(vec![]).await.is_ok());
        assert_eq!(h.pool.stats().await.total, 0);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(12.5), "12.5");
        assert_eq!(format_amount(3.0), "3");
    }

    fn signed_status(date: NaiveDate) -> AccountRunStatus {
        AccountRunStatus {
            date,
            signed: true,
            sign_msg: "signed in".to_string(),
            balance: 0.0,
            withdraw_status: NO_BALANCE.to_string(),
            last_error: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_batch_and_keeps_prior_status() {
        let transport = Arc::new(ScriptedTransport::repeating(Err(TransportError::Timeout)));
        let h = harness(Store::in_memory(), transport.clone(), None).await;
        let earlier = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        for id in ["a", "b", "c"] {
            h.statuses.record(id, signed_status(earlier)).await.unwrap();
        }

        let accounts = vec![
            Account::new("a", "pw"),
            Account::new("b", "pw"),
            Account::new("c", "pw"),
        ];
        let (result, _) = tokio::join!(h.orchestrator.run_batch(accounts), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.shutdown.send(true).unwrap();
        });

        let counters = result.unwrap();
        assert_eq!(counters.success_count, 0);
        assert_eq!(counters.error_count, 0);
        assert!(!counters.is_running);
        assert!(!h.orchestrator.is_running());

        for id in ["a", "b", "c"] {
            assert_eq!(h.statuses.get(id).await.unwrap(), signed_status(earlier));
        }
        // a and b each made one call before backing off; c never started
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_account_signed_today_is_skipped() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let h = harness(Store::in_memory(), transport.clone(), None).await;
        let today = Local::now().date_naive();

        h.accounts.add(Account::new("alice", "pw")).await.unwrap();
        h.accounts.record_login("alice", today).await.unwrap();
        h.statuses.record("alice", signed_status(today)).await.unwrap();

        let counters = h.orchestrator.run_enabled().await.unwrap();
        assert_eq!(counters.total_accounts, 1);
        assert_eq!(counters.success_count, 1);
        assert_eq!(counters.error_count, 0);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_login_without_sign_today_is_retried() {
        let transport = Arc::new(FnTransport(remote("0", Arc::new(Mutex::new(Vec::new())))));
        let h = harness(Store::in_memory(), transport, None).await;
        let today = Local::now().date_naive();

        h.accounts.add(Account::new("alice", "pw")).await.unwrap();
        h.accounts.record_login("alice", today).await.unwrap();
        h.statuses
            .record("alice", AccountRunStatus::failed(today, "request timed out"))
            .await
            .unwrap();

        let counters = h.orchestrator.run_enabled().await.unwrap();
        assert_eq!(counters.success_count, 1);
        let status = h.statuses.get("alice").await.unwrap();
        assert!(status.signed);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_policy_for_overrides_mode() {
        let settings = settings();
        assert_eq!(settings.policy_for(None), RetryPolicy::bounded(3));
        assert_eq!(
            settings.policy_for(Some(RetryMode::Bounded)),
            RetryPolicy::bounded(3)
        );
        assert_eq!(
            settings.policy_for(Some(RetryMode::UntilSuccess)),
            RetryPolicy::until_success(EngineConfig::default().unbounded_max_attempts)
        );
    }

    #[tokio::test]
    async fn test_trigger_reports_chosen_mode() {
        let transport = Arc::new(FnTransport(remote("0", Arc::new(Mutex::new(Vec::new())))));
        let h = harness(Store::in_memory(), transport, None).await;

        let mode = h.orchestrator.trigger(Some(RetryMode::UntilSuccess)).unwrap();
        assert_eq!(mode, RetryMode::UntilSuccess);
        assert!(matches!(
            h.orchestrator.trigger(None),
            Err(AutosignError::BatchAlreadyRunning)
        ));

        while h.orchestrator.is_running() {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.orchestrator.trigger(None).unwrap(), RetryMode::Bounded);
    }
}
