use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use tokio_util::sync::CancellationToken;

use crate::delivery::NotificationSink;
use crate::messages;
use crate::roster::{RosterEntry, UserDirectory};

use super::clock::Clock;
use super::job::{ReminderJob, derive_jobs};

/// Local times of day at which every user is nudged.
const LOCAL_SLOTS: [(u32, u32); 2] = [(12, 0), (18, 0)];

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const FETCH_RETRY_INITIAL: Duration = Duration::from_secs(1);
const FETCH_RETRY_CAP: Duration = Duration::from_secs(30);

/// Derives reminder jobs from a roster snapshot and evaluates them in a
/// polling loop until cancelled. All job state is owned by the run.
pub struct ReminderScheduler {
    directory: Arc<dyn UserDirectory>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl ReminderScheduler {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            sink,
            clock,
        }
    }

    fn local_slots() -> Vec<NaiveTime> {
        LOCAL_SLOTS
            .iter()
            .map(|&(h, m)| NaiveTime::from_hms_opt(h, m, 0).expect("Slot times are valid."))
            .collect()
    }

    /// One scheduler run. An empty roster still enters the loop so that a
    /// later stop/restart behaves the same as with users present.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(roster) = self.fetch_roster(&cancel).await else {
            log::info!("Scheduler run cancelled before the roster was available");
            return;
        };

        let mut jobs = derive_jobs(&roster, &Self::local_slots(), self.clock.now());
        log::info!(
            "Scheduler run started. [users = {}, jobs = {}]",
            roster.len(),
            jobs.len()
        );

        loop {
            self.fire_due(&mut jobs).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        log::info!("Scheduler run stopped. [jobs_discarded = {}]", jobs.len());
    }

    /// Retries until the directory answers or the run is cancelled. The delay
    /// doubles up to a cap; the retry itself is unbounded, so a backend that
    /// is slow to come up only delays the run.
    async fn fetch_roster(&self, cancel: &CancellationToken) -> Option<Vec<RosterEntry>> {
        let mut delay = FETCH_RETRY_INITIAL;
        loop {
            match self.directory.list_users().await {
                Ok(roster) => return Some(roster),
                Err(error) => {
                    log::warn!(
                        "Roster fetch failed, retrying. [retry_in = {:?}, error = {:#}]",
                        delay,
                        error
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            delay = (delay * 2).min(FETCH_RETRY_CAP);
        }
    }

    /// Fires every due job once. A failed or slow delivery must not keep the
    /// remaining due jobs from firing in the same cycle.
    async fn fire_due(&self, jobs: &mut [ReminderJob]) {
        let now = self.clock.now();
        for job in jobs.iter_mut() {
            if !job.is_due(now) {
                continue;
            }

            let delivery = self.sink.notify(job.user_id, messages::REMINDER);
            match tokio::time::timeout(DELIVERY_TIMEOUT, delivery).await {
                Ok(Ok(())) => log::info!(
                    "Reminder sent. [user_id = {}, fire_at = {}]",
                    job.user_id,
                    job.fire_at()
                ),
                Ok(Err(error)) => log::warn!(
                    "Reminder delivery failed. [user_id = {}, error = {:#}]",
                    job.user_id,
                    error
                ),
                Err(_) => log::warn!(
                    "Reminder delivery timed out. [user_id = {}, timeout = {:?}]",
                    job.user_id,
                    DELIVERY_TIMEOUT
                ),
            }

            job.mark_fired(now);
        }
    }
}

#[cfg(test)]
mod tests;
