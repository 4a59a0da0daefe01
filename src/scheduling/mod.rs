mod clock;
mod controller;
mod job;
mod scheduler;

pub use clock::{Clock, SystemClock};
pub use controller::SchedulerController;
pub use scheduler::ReminderScheduler;
