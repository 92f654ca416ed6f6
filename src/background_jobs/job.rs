use super::context::JobContext;
use std::time::Duration;

/// Schedule for when a job should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSchedule {
    /// Run repeatedly, waiting `every` after each completed run.
    Interval {
        every: Duration,
        /// Delay before the first run after the scheduler starts.
        initial_delay: Duration,
    },
}

impl JobSchedule {
    pub fn interval(every: Duration) -> Self {
        JobSchedule::Interval {
            every,
            initial_delay: Duration::ZERO,
        }
    }

    /// First run happens one full interval after startup.
    pub fn delayed_interval(every: Duration) -> Self {
        JobSchedule::Interval {
            every,
            initial_delay: every,
        }
    }

    pub fn every(&self) -> Duration {
        match self {
            JobSchedule::Interval { every, .. } => *every,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        match self {
            JobSchedule::Interval { initial_delay, .. } => *initial_delay,
        }
    }
}

/// Errors that can occur during job execution.
#[derive(Debug)]
pub enum JobError {
    NotFound,
    AlreadyRunning,
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::NotFound => write!(f, "Job not found"),
            JobError::AlreadyRunning => write!(f, "Job is already running"),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// Trait for background jobs.
///
/// Jobs are executed synchronously in a blocking context.
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// When this job should be scheduled to run.
    fn schedule(&self) -> JobSchedule;

    /// Execute the job.
    ///
    /// This method is called from a blocking context using `spawn_blocking`.
    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_constructors() {
        let every = Duration::from_secs(3600);
        assert_eq!(JobSchedule::interval(every).initial_delay(), Duration::ZERO);
        assert_eq!(JobSchedule::delayed_interval(every).initial_delay(), every);
        assert_eq!(JobSchedule::delayed_interval(every).every(), every);
    }

    #[test]
    fn job_error_display() {
        assert_eq!(
            JobError::ExecutionFailed("boom".to_string()).to_string(),
            "Execution failed: boom"
        );
        assert_eq!(JobError::AlreadyRunning.to_string(), "Job is already running");
    }
}
