//! Health snapshot production
//!
//! - `collector`: samples the database probe, host resources and live
//!   connections into a [`HealthSnapshot`]
//! - `sampler`: host/process resource readings
//! - `types`: snapshot value types and status precedence

mod collector;
mod sampler;
mod types;

pub use collector::HealthCollector;
pub use sampler::{HostSampler, SystemSample, SystemSampler};
pub use types::{
    ConnectionCheck, DatabaseCheck, DependencyStatus, HealthChecks, HealthSnapshot, HealthStatus,
    MemoryCheck, SystemCheck,
};
