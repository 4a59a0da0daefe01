use chrono::{DateTime, Utc};

/// Source of the reference clock all fire times are compared against.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Advances with the tokio test clock, so paused-time tests move the
/// reference clock and the timers together.
#[cfg(test)]
pub struct SimulatedClock {
    epoch: DateTime<Utc>,
    started: tokio::time::Instant,
}

#[cfg(test)]
impl SimulatedClock {
    pub fn starting_at(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            started: tokio::time::Instant::now(),
        }
    }
}

#[cfg(test)]
impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed =
            chrono::TimeDelta::from_std(self.started.elapsed()).expect("elapsed fits in TimeDelta");
        self.epoch + elapsed
    }
}
