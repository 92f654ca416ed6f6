use super::RetryPolicy;
use crate::clock::Clock;
use crate::mail::{EmailComposer, MailTransport};
use crate::server::metrics;
use crate::store::{DeliveryTask, Repositories, UnitOfWork};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryRunSummary {
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Failures that used up the last allowed attempt.
    pub exhausted: usize,
}

/// Sends due confirmation emails from the outbox.
///
/// One run is one transaction: every claimed task stays locked until the run
/// commits, and a persistence error rolls back every update made so far.
pub struct ConfirmationDeliveryWorker {
    uow: UnitOfWork,
    mailer: Arc<dyn MailTransport>,
    composer: EmailComposer,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
}

impl ConfirmationDeliveryWorker {
    pub fn new(
        uow: UnitOfWork,
        mailer: Arc<dyn MailTransport>,
        composer: EmailComposer,
        clock: Arc<dyn Clock>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            uow,
            mailer,
            composer,
            clock,
            retry_policy,
        }
    }

    pub fn run_once(&self) -> Result<DeliveryRunSummary> {
        let summary = self
            .uow
            .execute(|repos| -> Result<DeliveryRunSummary> { self.deliver_due(repos) })?;

        metrics::record_confirmation_emails("delivered", summary.delivered);
        metrics::record_confirmation_emails("failed", summary.failed);
        metrics::record_confirmation_emails("exhausted", summary.exhausted);

        if summary.claimed > 0 {
            info!(
                "Confirmation delivery run: {} claimed, {} delivered, {} failed",
                summary.claimed, summary.delivered, summary.failed
            );
        }
        Ok(summary)
    }

    fn deliver_due(&self, repos: &mut dyn Repositories) -> Result<DeliveryRunSummary> {
        let tasks = repos.claim_due_delivery_tasks(self.clock.now())?;
        let mut summary = DeliveryRunSummary {
            claimed: tasks.len(),
            ..Default::default()
        };
        debug!("Claimed {} confirmation email tasks", tasks.len());

        for mut task in tasks {
            let subscription = repos.find_subscription_by_token(task.token)?.ok_or_else(|| {
                anyhow!(
                    "Delivery task {} references missing subscription {}",
                    task.id,
                    task.token
                )
            })?;

            let email = self
                .composer
                .confirmation_email(&subscription, self.clock.now());
            match self.mailer.send(&email) {
                Ok(()) => {
                    mark_delivered(&mut task);
                    repos.update_delivery_task(&task)?;
                    summary.delivered += 1;
                }
                Err(err) => {
                    self.mark_failed(&mut task);
                    repos.update_delivery_task(&task)?;
                    summary.failed += 1;
                    if task.is_exhausted() {
                        summary.exhausted += 1;
                        warn!(
                            "Confirmation email to {} failed for the last time ({} attempts), giving up: {}",
                            task.to_address, task.attempts, err
                        );
                    } else {
                        warn!(
                            "Confirmation email to {} failed (attempt {}), retrying after {}: {}",
                            task.to_address, task.attempts, task.next_eligible_at, err
                        );
                    }
                }
            }
        }

        Ok(summary)
    }

    fn mark_failed(&self, task: &mut DeliveryTask) {
        task.attempts += 1;
        task.next_eligible_at = self
            .retry_policy
            .next_eligible_at(self.clock.now(), task.attempts);
    }
}

fn mark_delivered(task: &mut DeliveryTask) {
    task.attempts += 1;
    task.completed = true;
}
