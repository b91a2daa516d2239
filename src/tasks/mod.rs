//! Background tasks

mod broadcast;

pub use broadcast::{BroadcastScheduler, SchedulerStats};
