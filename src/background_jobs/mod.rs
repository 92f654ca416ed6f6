//! Background job scheduling and execution system.
//!
//! Periodic work (confirmation delivery, weather reports) is expressed as
//! `BackgroundJob`s and driven by a single `JobScheduler` loop.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, JobError, JobSchedule};
pub use scheduler::{JobScheduler, SchedulerHandle};
