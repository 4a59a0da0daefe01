use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::scheduler::ReminderScheduler;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct SchedulerRun {
    task_handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl SchedulerRun {
    fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }

    /// Cancels the run and waits for the loop to observe it, bounded so a
    /// wedged delivery call cannot stall the caller forever.
    async fn cancel(self, timeout: Duration) {
        self.cancellation_token.cancel();
        let _ = tokio::time::timeout(timeout, self.task_handle).await;
    }
}

/// Serializes run lifecycle requests: at most one live polling loop. Every
/// roster mutation goes through `restart` so the next run reads fresh state.
pub struct SchedulerController {
    scheduler: Arc<ReminderScheduler>,
    run: Mutex<Option<SchedulerRun>>,
}

impl SchedulerController {
    pub fn new(scheduler: ReminderScheduler) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            run: Mutex::new(None),
        }
    }

    /// Spawns a run unless one is already live. Returns whether a new run
    /// was spawned.
    pub async fn start(&self) -> bool {
        let mut run = self.run.lock().await;
        if let Some(current) = run.as_ref() {
            if !current.is_finished() {
                log::info!("Scheduler already running, start request ignored");
                return false;
            }
        }

        let cancellation_token = CancellationToken::new();
        let loop_token = cancellation_token.child_token();
        let scheduler = Arc::clone(&self.scheduler);
        let task_handle = tokio::spawn(async move {
            scheduler.run(loop_token).await;
        });

        *run = Some(SchedulerRun {
            task_handle,
            cancellation_token,
        });
        log::info!("Scheduler run spawned");
        true
    }

    /// Stops the live run, if any, and joins it before returning, so a
    /// following `start` always derives jobs the old run can no longer touch.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        if let Some(current) = run.take() {
            current.cancel(SHUTDOWN_TIMEOUT).await;
            log::info!("Scheduler run stopped");
        }
    }

    pub async fn restart(&self) {
        self.stop().await;
        self.start().await;
    }

    pub async fn is_active(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(|run| !run.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};

    use crate::delivery::NotificationSink;
    use crate::roster::{RosterEntry, UserDirectory, UserId};
    use crate::scheduling::ReminderScheduler;
    use crate::scheduling::clock::SimulatedClock;

    use super::SchedulerController;

    struct CountingDirectory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UserDirectory for CountingDirectory {
        async fn list_users(&self) -> anyhow::Result<Vec<RosterEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct NullSink;

    #[async_trait]
    impl NotificationSink for NullSink {
        async fn notify(&self, _user_id: UserId, _message: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn epoch() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn controller() -> (Arc<CountingDirectory>, SchedulerController) {
        let directory = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(SimulatedClock::starting_at(epoch()));
        let scheduler = ReminderScheduler::new(directory.clone(), Arc::new(NullSink), clock);
        (directory, SchedulerController::new(scheduler))
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_while_a_run_is_live() {
        let (directory, controller) = controller();

        assert!(controller.start().await);
        assert!(!controller.start().await);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(controller.is_active().await);
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_start_derives_a_fresh_roster() {
        let (directory, controller) = controller();

        controller.start().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        controller.stop().await;
        assert!(!controller.is_active().await);

        assert!(controller.start().await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(directory.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_run() {
        let (directory, controller) = controller();

        controller.start().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        controller.restart().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(controller.is_active().await);
        assert_eq!(directory.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_a_run_is_a_no_op() {
        let (directory, controller) = controller();

        controller.stop().await;
        assert!(!controller.is_active().await);
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);

        assert!(controller.start().await);
    }
}
