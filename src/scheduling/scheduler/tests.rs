use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::delivery::NotificationSink;
use crate::roster::{RosterEntry, UserDirectory, UserId};
use crate::scheduling::clock::{Clock, SimulatedClock};

use super::ReminderScheduler;

fn epoch() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

fn time(h: u32, m: u32, s: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, s).unwrap()
}

struct StaticDirectory {
    roster: Vec<RosterEntry>,
    calls: AtomicUsize,
}

impl StaticDirectory {
    fn new(roster: Vec<RosterEntry>) -> Arc<Self> {
        Arc::new(Self {
            roster,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn list_users(&self) -> anyhow::Result<Vec<RosterEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.roster.clone())
    }
}

struct FlakyDirectory {
    failures_left: AtomicUsize,
    roster: Vec<RosterEntry>,
    calls: AtomicUsize,
}

#[async_trait]
impl UserDirectory for FlakyDirectory {
    async fn list_users(&self) -> anyhow::Result<Vec<RosterEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("backend unavailable");
        }
        Ok(self.roster.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Delivery {
    user_id: UserId,
    at: DateTime<Utc>,
    delivered: bool,
}

struct RecordingSink {
    clock: Arc<SimulatedClock>,
    fail_for: Option<UserId>,
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    fn new(clock: Arc<SimulatedClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            fail_for: None,
            deliveries: Mutex::new(Vec::new()),
        })
    }

    fn failing_for(clock: Arc<SimulatedClock>, user_id: UserId) -> Arc<Self> {
        Arc::new(Self {
            clock,
            fail_for: Some(user_id),
            deliveries: Mutex::new(Vec::new()),
        })
    }

    fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, user_id: UserId, _message: &str) -> anyhow::Result<()> {
        let delivered = self.fail_for != Some(user_id);
        self.deliveries.lock().unwrap().push(Delivery {
            user_id,
            at: self.clock.now(),
            delivered,
        });
        if delivered {
            Ok(())
        } else {
            anyhow::bail!("chat transport refused the message")
        }
    }
}

fn spawn_run(scheduler: ReminderScheduler) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let token = CancellationToken::new();
    let loop_token = token.child_token();
    let handle = tokio::spawn(async move { scheduler.run(loop_token).await });
    (token, handle)
}

#[tokio::test(start_paused = true)]
async fn converts_local_slots_and_fires_once_per_day() {
    let clock = Arc::new(SimulatedClock::starting_at(epoch()));
    let directory = StaticDirectory::new(vec![RosterEntry {
        user_id: 1,
        offset_hours: 5,
    }]);
    let sink = RecordingSink::new(clock.clone());
    let scheduler = ReminderScheduler::new(directory, sink.clone(), clock.clone());
    let (token, _handle) = spawn_run(scheduler);

    // local 12:00 and 18:00 at UTC+5 are 07:00 and 13:00 reference time
    tokio::time::sleep(Duration::from_secs(7 * 3600 + 30)).await;
    let deliveries = sink.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].user_id, 1);
    assert_eq!(deliveries[0].at.time(), time(7, 0, 0));

    // nothing more until the evening slot comes around
    tokio::time::sleep(Duration::from_secs(5 * 3600)).await;
    assert_eq!(sink.deliveries().len(), 1);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    let deliveries = sink.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[1].at.time(), time(13, 0, 0));

    // the morning job fires again only after the next day boundary
    tokio::time::sleep(Duration::from_secs(18 * 3600)).await;
    let deliveries = sink.deliveries();
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[2].at.time(), time(7, 0, 0));
    assert_eq!(
        deliveries[2].at.date_naive(),
        epoch().date_naive().succ_opt().unwrap()
    );

    token.cancel();
}

#[tokio::test(start_paused = true)]
async fn one_failed_delivery_does_not_block_the_rest_of_the_cycle() {
    let clock = Arc::new(SimulatedClock::starting_at(epoch()));
    let directory = StaticDirectory::new(vec![
        RosterEntry {
            user_id: 1,
            offset_hours: 0,
        },
        RosterEntry {
            user_id: 2,
            offset_hours: 0,
        },
    ]);
    let sink = RecordingSink::failing_for(clock.clone(), 1);
    let scheduler = ReminderScheduler::new(directory, sink.clone(), clock.clone());
    let (token, _handle) = spawn_run(scheduler);

    tokio::time::sleep(Duration::from_secs(12 * 3600 + 30)).await;

    let deliveries = sink.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().any(|d| d.user_id == 1 && !d.delivered));
    assert!(deliveries.iter().any(|d| d.user_id == 2 && d.delivered));
    // both attempts belong to the same poll cycle
    assert_eq!(deliveries[0].at, deliveries[1].at);

    token.cancel();
}

#[tokio::test(start_paused = true)]
async fn roster_fetch_is_retried_until_the_backend_recovers() {
    let clock = Arc::new(SimulatedClock::starting_at(epoch()));
    let directory = Arc::new(FlakyDirectory {
        failures_left: AtomicUsize::new(3),
        roster: vec![RosterEntry {
            user_id: 7,
            offset_hours: 0,
        }],
        calls: AtomicUsize::new(0),
    });
    let sink = RecordingSink::new(clock.clone());
    let scheduler = ReminderScheduler::new(directory.clone(), sink.clone(), clock.clone());
    let (token, _handle) = spawn_run(scheduler);

    // backoff 1s + 2s + 4s puts the successful fourth attempt inside the
    // first ten seconds
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(directory.calls.load(Ordering::SeqCst), 4);

    tokio::time::sleep(Duration::from_secs(12 * 3600)).await;
    assert!(
        sink.deliveries()
            .iter()
            .any(|d| d.user_id == 7 && d.delivered)
    );

    token.cancel();
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_run_and_discards_jobs() {
    let clock = Arc::new(SimulatedClock::starting_at(epoch()));
    let directory = StaticDirectory::new(vec![RosterEntry {
        user_id: 1,
        offset_hours: 0,
    }]);
    let sink = RecordingSink::new(clock.clone());
    let scheduler = ReminderScheduler::new(directory, sink.clone(), clock.clone());
    let (token, handle) = spawn_run(scheduler);

    tokio::time::sleep(Duration::from_secs(60)).await;
    token.cancel();
    handle.await.unwrap();

    // well past both slots, with the run gone nothing fires
    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
    assert!(sink.deliveries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_roster_still_enters_the_polling_loop() {
    let clock = Arc::new(SimulatedClock::starting_at(epoch()));
    let directory = StaticDirectory::new(Vec::new());
    let sink = RecordingSink::new(clock.clone());
    let scheduler = ReminderScheduler::new(directory, sink.clone(), clock.clone());
    let (token, handle) = spawn_run(scheduler);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(!handle.is_finished());
    assert!(sink.deliveries().is_empty());

    token.cancel();
    handle.await.unwrap();
}
