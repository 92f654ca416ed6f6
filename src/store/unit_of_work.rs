use super::{Database, Repositories, TxOutcome};
use anyhow::anyhow;
use std::sync::Arc;
use tracing::warn;

/// Runs closures against a [`Database`] and hands their results back.
///
/// `execute` commits when the closure returns `Ok` and rolls back when it
/// returns `Err` or panics. Nesting is not supported: a closure must not call
/// back into the same `UnitOfWork`.
#[derive(Clone)]
pub struct UnitOfWork {
    db: Arc<dyn Database>,
}

impl UnitOfWork {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn execute<T, E, F>(&self, work: F) -> Result<T, E>
    where
        E: From<anyhow::Error>,
        F: FnOnce(&mut dyn Repositories) -> Result<T, E>,
    {
        let mut work = Some(work);
        let mut result: Option<Result<T, E>> = None;

        let scope = self.db.with_transaction(&mut |repos: &mut dyn Repositories| {
            let Some(work) = work.take() else {
                return TxOutcome::Rollback;
            };
            let outcome = work(repos);
            let decision = if outcome.is_ok() {
                TxOutcome::Commit
            } else {
                TxOutcome::Rollback
            };
            result = Some(outcome);
            decision
        });

        match (result, scope) {
            (Some(Err(err)), Err(scope_err)) => {
                warn!("Rollback after a failed unit of work also failed: {:#}", scope_err);
                Err(err)
            }
            (_, Err(scope_err)) => Err(scope_err.into()),
            (Some(outcome), Ok(())) => outcome,
            (None, Ok(())) => Err(anyhow!("Transaction body did not run").into()),
        }
    }

    /// Runs `work` on a plain connection, outside any transaction.
    pub fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        E: From<anyhow::Error>,
        F: FnOnce(&mut dyn Repositories) -> Result<T, E>,
    {
        let mut work = Some(work);
        let mut result: Option<Result<T, E>> = None;

        self.db.with_connection(&mut |repos: &mut dyn Repositories| {
            if let Some(work) = work.take() {
                result = Some(work(repos));
            }
        })?;

        result.unwrap_or_else(|| Err(anyhow!("Connection body did not run").into()))
    }
}
