//! Confirmation email delivery job.
//!
//! Drains due tasks from the confirmation outbox on a short interval.

use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use crate::outbox::ConfirmationDeliveryWorker;
use std::time::Duration;

pub struct ConfirmationDeliveryJob {
    worker: ConfirmationDeliveryWorker,
    interval: Duration,
}

impl ConfirmationDeliveryJob {
    pub fn new(worker: ConfirmationDeliveryWorker, interval: Duration) -> Self {
        Self { worker, interval }
    }
}

impl BackgroundJob for ConfirmationDeliveryJob {
    fn id(&self) -> &'static str {
        "confirmation_delivery"
    }

    fn name(&self) -> &'static str {
        "Confirmation Delivery"
    }

    fn description(&self) -> &'static str {
        "Send pending subscription confirmation emails with retry and backoff"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::interval(self.interval)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        self.worker
            .run_once()
            .map(|_| ())
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))
    }
}
