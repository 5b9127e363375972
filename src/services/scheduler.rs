//! Daily batch scheduler

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Local, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::batch::BatchOrchestrator;
use crate::config::ScheduleConfig;
use crate::error::AutosignError;

/// Longest single sleep; the wall clock is re-read after each one
const MAX_SLEEP: Duration = Duration::from_secs(300);

/// Next `hour:minute` strictly after `now`, in `now`'s time zone
pub fn next_occurrence<Tz: TimeZone>(
    now: &DateTime<Tz>,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive();

    for offset in 0..=2 {
        let day = today.checked_add_days(Days::new(offset))?;
        let naive = day.and_hms_opt(hour, minute, 0)?;
        // `earliest` skips nonexistent local times inside DST gaps
        if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
            if candidate > *now {
                return Some(candidate);
            }
        }
    }
    None
}

/// Runs the batch once a day at the configured local time
pub struct DailyScheduler {
    orchestrator: Arc<BatchOrchestrator>,
    hour: u32,
    minute: u32,
}

impl DailyScheduler {
    pub fn new(orchestrator: Arc<BatchOrchestrator>, config: &ScheduleConfig) -> Self {
        Self {
            orchestrator,
            hour: config.hour,
            minute: config.minute,
        }
    }

    /// Run the scheduler (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting daily scheduler at {:02}:{:02} local time",
            self.hour, self.minute
        );

        loop {
            let Some(next) = next_occurrence(&Local::now(), self.hour, self.minute) else {
                error!("Could not compute next run time, scheduler stopping");
                break;
            };
            self.orchestrator.set_next_run(Some(next.with_timezone(&Utc)));
            info!(next_run = %next, "Next batch scheduled");

            if !wait_until(next, &mut shutdown).await {
                info!("Daily scheduler shutting down");
                break;
            }

            match self.orchestrator.run_enabled().await {
                Ok(_) => {}
                Err(AutosignError::BatchAlreadyRunning) => {
                    warn!("Skipping scheduled batch, a run is already in progress")
                }
                Err(e) => error!("Scheduled batch failed: {}", e),
            }
        }

        self.orchestrator.set_next_run(None);
    }
}

/// Sleep until `target`; `false` when shutdown arrives first
async fn wait_until(target: DateTime<Local>, shutdown: &mut watch::Receiver<bool>) -> bool {
    loop {
        if *shutdown.borrow() {
            return false;
        }
        let remaining = (target - Local::now()).to_std().unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(remaining.min(MAX_SLEEP)) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

/// Handle for managing the scheduler
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for SchedulerHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ResilientClient, RetryPolicy};
    use crate::proxy::{DirectResolver, ProxyPool};
    use crate::repository::{AccountRepository, StatusRepository};
    use crate::services::batch::BatchSettings;
    use crate::storage::Store;
    use crate::test_support::ScriptedTransport;
    use chrono::Timelike;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_next_occurrence_later_today() {
        let now = at(2024, 5, 1, 0, 10);
        assert_eq!(next_occurrence(&now, 0, 30), Some(at(2024, 5, 1, 0, 30)));
    }

    #[test]
    fn test_next_occurrence_rolls_to_tomorrow() {
        assert_eq!(
            next_occurrence(&at(2024, 5, 1, 0, 30), 0, 30),
            Some(at(2024, 5, 2, 0, 30))
        );
        assert_eq!(
            next_occurrence(&at(2024, 12, 31, 23, 0), 0, 30),
            Some(at(2025, 1, 1, 0, 30))
        );
    }

    #[test]
    fn test_next_occurrence_invalid_time() {
        assert_eq!(next_occurrence(&at(2024, 5, 1, 0, 0), 24, 0), None);
    }

    #[tokio::test]
    async fn test_scheduler_publishes_next_run_and_stops() {
        let store = Store::in_memory();
        let (_client_tx, client_rx) = watch::channel(false);
        let client = ResilientClient::new(
            Arc::new(ScriptedTransport::new(vec![])),
            Arc::new(DirectResolver),
            client_rx,
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(
            client,
            Arc::new(AccountRepository::load(store.clone()).await.unwrap()),
            Arc::new(StatusRepository::load(store.clone()).await.unwrap()),
            Arc::new(ProxyPool::load(store, 5).await.unwrap()),
            None,
            BatchSettings {
                policy: RetryPolicy::bounded(1),
                engine: Default::default(),
                concurrency: 1,
                coin_type: "income_wallet".into(),
                withdraw_password: String::new(),
                pool_topup_tries: 0,
                topup_pause: Duration::ZERO,
            },
        ));

        let now = Local::now();
        let target = now + chrono::Duration::hours(2);
        let config = ScheduleConfig {
            hour: target.hour(),
            minute: target.minute(),
            retry_mode: Default::default(),
            concurrency: 1,
            pool_topup_tries: 0,
        };

        let scheduler = DailyScheduler::new(orchestrator.clone(), &config);
        let (handle, shutdown) = SchedulerHandle::new();
        let task = tokio::spawn(async move { scheduler.run(shutdown).await });

        for _ in 0..100 {
            if orchestrator.counters().next_run.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let next_run = orchestrator.counters().next_run.unwrap();
        assert!(next_run > Utc::now());

        handle.shutdown();
        task.await.unwrap();
        assert!(orchestrator.counters().next_run.is_none());
        assert!(!orchestrator.is_running());
    }
}
