use chrono::{DateTime, NaiveTime, TimeDelta, Timelike, Utc};

use crate::roster::{RosterEntry, UserId};

/// One recurring obligation: notify `user_id` every day at `fire_at` on the
/// reference clock. Lives only as long as the run that derived it.
#[derive(Debug, Clone)]
pub struct ReminderJob {
    pub user_id: UserId,
    fire_at: NaiveTime,
    next_fire_at: DateTime<Utc>,
}

impl ReminderJob {
    pub fn new(user_id: UserId, fire_at: NaiveTime, now: DateTime<Utc>) -> Self {
        let fire_at = fire_at.with_nanosecond(0).expect("Will never fail.");
        Self {
            user_id,
            fire_at,
            next_fire_at: next_occurrence(fire_at, now),
        }
    }

    pub fn fire_at(&self) -> NaiveTime {
        self.fire_at
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_fire_at
    }

    /// Reschedules for the next day's crossing of `fire_at`.
    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.next_fire_at = next_occurrence(self.fire_at, now);
    }
}

/// Converts a local slot time to the reference clock: `slot - offset`,
/// wrapping around midnight. Pure time-of-day arithmetic, no date component.
pub fn reference_fire_time(local_slot: NaiveTime, offset_hours: i32) -> NaiveTime {
    local_slot - TimeDelta::hours(i64::from(offset_hours))
}

/// First instant strictly after `now` whose time-of-day equals `fire_at`.
pub fn next_occurrence(fire_at: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let candidate = now.date_naive().and_time(fire_at).and_utc();
    if candidate > now {
        candidate
    } else {
        candidate
            .checked_add_signed(TimeDelta::days(1))
            .expect("Not realistic to overflow")
    }
}

/// One job per (user, slot) pair.
pub fn derive_jobs(
    roster: &[RosterEntry],
    local_slots: &[NaiveTime],
    now: DateTime<Utc>,
) -> Vec<ReminderJob> {
    roster
        .iter()
        .flat_map(|entry| {
            local_slots.iter().map(move |slot| {
                ReminderJob::new(
                    entry.user_id,
                    reference_fire_time(*slot, entry.offset_hours),
                    now,
                )
            })
        })
        .collect()
}
