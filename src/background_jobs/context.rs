use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self { cancellation_token }
    }

    /// Check if cancellation has been requested.
    ///
    /// Jobs should check this before starting work and return early with
    /// `JobError::Cancelled` if true.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
