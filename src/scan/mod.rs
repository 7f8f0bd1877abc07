//! Scan core
//! - engine.rs: walks sources, probes manifests, resolves latest versions
//! - outdated.rs: semver staleness decision
//! - scheduler.rs: single-flight execution, cron loop, job lifecycle

pub mod engine;
pub mod outdated;
pub mod scheduler;

pub use engine::{ScanEngine, ScanError, ScanOutcome, ScanRunner};
pub use scheduler::{ScanScheduler, SchedulerError};
