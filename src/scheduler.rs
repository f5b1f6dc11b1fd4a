//! Daily background jobs
//!
//! [`DailyScheduler`] runs one [`DailyTask`] on a [`Schedule`], by default at
//! every local midnight. The loop is a spawned task with its own
//! [`CancellationToken`]; [`DailyScheduler::stop`] cancels it and waits for
//! it to exit, so nothing runs after `stop` returns.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::limits::UserLimitManager;
use crate::notify::AdminNotifier;

/// When the next run is due
pub trait Schedule: Send + Sync + 'static {
    /// Time to wait from now until the next run
    fn until_next(&self) -> Duration;
}

/// Every local midnight
#[derive(Debug, Clone, Copy, Default)]
pub struct Midnight;

impl Schedule for Midnight {
    fn until_next(&self) -> Duration {
        let now = Local::now();
        let next = next_midnight_after(&now);
        (next - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Fixed interval between runs
#[derive(Debug, Clone, Copy)]
pub struct Every(pub Duration);

impl Schedule for Every {
    fn until_next(&self) -> Duration {
        self.0
    }
}

/// First midnight strictly after `now` in `now`'s time zone
///
/// Where a DST change skips midnight, the first valid instant of the new
/// day is used instead.
#[must_use]
pub fn next_midnight_after<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let fallback = now.clone() + chrono::Duration::days(1);

    let Some(tomorrow) = now.date_naive().succ_opt() else {
        return fallback;
    };

    (0..3)
        .filter_map(|hour| tomorrow.and_hms_opt(hour, 0, 0))
        .find_map(|naive| tz.from_local_datetime(&naive).earliest())
        .unwrap_or(fallback)
}

/// A job run by the scheduler
#[async_trait]
pub trait DailyTask: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

/// Clears the block list and tells administrators how many were cleared
pub struct BlockReset {
    limits: Arc<UserLimitManager>,
    notifier: AdminNotifier,
}

impl BlockReset {
    #[must_use]
    pub const fn new(limits: Arc<UserLimitManager>, notifier: AdminNotifier) -> Self {
        Self { limits, notifier }
    }
}

#[async_trait]
impl DailyTask for BlockReset {
    fn name(&self) -> &'static str {
        "block reset"
    }

    async fn run(&self) -> Result<()> {
        let removed = self.limits.clear_all()?;
        tracing::info!(removed, "daily block reset done");

        if removed > 0 {
            let text = format!(
                "Daily reset\n\nBlocked users cleared: {removed}\nDate: {}",
                Local::now().format("%Y-%m-%d")
            );
            self.notifier.notify(&text).await;
        }
        Ok(())
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs a [`DailyTask`] on a [`Schedule`] until stopped
pub struct DailyScheduler {
    schedule: Arc<dyn Schedule>,
    task: Arc<dyn DailyTask>,
    running: Mutex<Option<Running>>,
}

impl DailyScheduler {
    #[must_use]
    pub fn new(schedule: impl Schedule, task: impl DailyTask) -> Self {
        Self {
            schedule: Arc::new(schedule),
            task: Arc::new(task),
            running: Mutex::new(None),
        }
    }

    /// Start the loop; does nothing if it is already running
    ///
    /// Returns whether a loop was started.
    pub fn start(&self) -> bool {
        let mut running = self.running();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::warn!(task = self.task.name(), "scheduler already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.schedule),
            Arc::clone(&self.task),
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });

        tracing::info!(task = self.task.name(), "scheduler started");
        true
    }

    /// Stop the loop and wait until it has exited
    pub async fn stop(&self) {
        let Some(Running { cancel, handle }) = self.running().take() else {
            return;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::error!(task = self.task.name(), error = %e, "scheduler task failed");
        }
        tracing::info!(task = self.task.name(), "scheduler stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_loop(
    schedule: Arc<dyn Schedule>,
    task: Arc<dyn DailyTask>,
    cancel: CancellationToken,
) {
    loop {
        let wait = schedule.until_next();
        tracing::info!(
            task = task.name(),
            wait_secs = wait.as_secs(),
            "next scheduled run"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }

        match AssertUnwindSafe(task.run()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(task = task.name(), error = %e, "scheduled task failed");
            }
            Err(_) => tracing::error!(task = task.name(), "scheduled task panicked"),
        }
    }
    tracing::debug!(task = task.name(), "scheduler loop exited");
}
