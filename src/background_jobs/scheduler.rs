use super::context::JobContext;
use super::job::{BackgroundJob, JobError};
use crate::server::metrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how long the loop sleeps when nothing is due.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Command sent to the scheduler loop.
enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

struct JobFinished {
    job_id: String,
    finished_at: Instant,
}

/// Shared state between scheduler and handle.
#[derive(Default)]
struct SharedJobState {
    jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    running_jobs: HashSet<String>,
}

/// Manages background job scheduling and execution.
///
/// A job never overlaps with itself: its next run is only scheduled once the
/// current one has finished, at completion time plus the job's interval.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Next due time per idle job. Running jobs have no entry.
    next_runs: HashMap<String, Instant>,

    /// Currently running jobs with their task handles.
    running_handles: HashMap<String, JoinHandle<()>>,

    command_tx: mpsc::Sender<SchedulerCommand>,
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    finished_tx: mpsc::UnboundedSender<JobFinished>,
    finished_receiver: mpsc::UnboundedReceiver<JobFinished>,

    /// Token to signal scheduler shutdown. Job contexts get child tokens.
    shutdown_token: CancellationToken,

    /// How long shutdown waits for each running job.
    shutdown_timeout: Duration,
}

impl JobScheduler {
    pub fn new(shutdown_token: CancellationToken, shutdown_timeout: Duration) -> Self {
        let (command_tx, command_receiver) = mpsc::channel(100);
        let (finished_tx, finished_receiver) = mpsc::unbounded_channel();
        Self {
            shared_state: Arc::new(RwLock::new(SharedJobState::default())),
            next_runs: HashMap::new(),
            running_handles: HashMap::new(),
            command_tx,
            command_receiver,
            finished_tx,
            finished_receiver,
            shutdown_token,
            shutdown_timeout,
        }
    }

    /// Register a job with the scheduler.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        if state.jobs.insert(job_id.clone(), job).is_some() {
            warn!("Job {} was registered twice, keeping the latest", job_id);
        }
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Spawn the scheduler loop and return a handle to control it.
    pub fn start(mut self) -> SchedulerHandle {
        let command_tx = self.command_tx.clone();
        let shared_state = Arc::clone(&self.shared_state);
        let shutdown_token = self.shutdown_token.clone();
        let task = tokio::spawn(async move {
            self.run().await;
        });
        SchedulerHandle {
            command_tx,
            shared_state,
            shutdown_token,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Main scheduler loop.
    async fn run(&mut self) {
        let shared_state = Arc::clone(&self.shared_state);
        {
            let state = shared_state.read().await;
            info!(
                "Starting job scheduler with {} registered jobs",
                state.jobs.len()
            );
            let now = Instant::now();
            for (job_id, job) in &state.jobs {
                self.next_runs
                    .insert(job_id.clone(), now + job.schedule().initial_delay());
            }
        }

        loop {
            let sleep_duration = self.time_until_next_run();
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(finished) = self.finished_receiver.recv() => {
                    self.on_job_finished(finished).await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    /// Manually trigger a job by ID.
    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        drop(state);

        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    fn time_until_next_run(&self) -> Duration {
        let now = Instant::now();
        self.next_runs
            .values()
            .map(|next_run| next_run.saturating_duration_since(now))
            .min()
            .unwrap_or(IDLE_CHECK_INTERVAL)
            .min(IDLE_CHECK_INTERVAL)
    }

    async fn run_due_jobs(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .next_runs
            .iter()
            .filter(|(_, next_run)| **next_run <= now)
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in due {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            }
        };

        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

        self.next_runs.remove(job_id);
        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job_id.to_string());
        }
        metrics::set_background_job_running(job_id, true);

        let ctx = JobContext::new(self.shutdown_token.child_token());
        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);
        let finished_tx = self.finished_tx.clone();

        // Jobs are synchronous, so they run on the blocking pool
        let handle = tokio::spawn(async move {
            let start_time = std::time::Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let status_label = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    "success"
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    "cancelled"
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    "failed"
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    "panic"
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            shared_state.write().await.running_jobs.remove(&job_id_owned);
            let _ = finished_tx.send(JobFinished {
                job_id: job_id_owned,
                finished_at: Instant::now(),
            });
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    async fn on_job_finished(&mut self, finished: JobFinished) {
        self.running_handles.remove(&finished.job_id);

        let state = self.shared_state.read().await;
        if let Some(job) = state.jobs.get(&finished.job_id) {
            let every = job.schedule().every();
            debug!("Job {} scheduled again in {:?}", finished.job_id, every);
            self.next_runs
                .insert(finished.job_id, finished.finished_at + every);
        }
    }

    /// Wait, within the shutdown timeout, for running jobs to finish.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        for (job_id, handle) in self.running_handles.drain() {
            info!("Waiting for job {} to complete...", job_id);
            if tokio::time::timeout(self.shutdown_timeout, handle)
                .await
                .is_err()
            {
                warn!(
                    "Job {} did not finish within {:?}, leaving it behind",
                    job_id, self.shutdown_timeout
                );
            }
        }
        self.next_runs.clear();
        info!("Scheduler shutdown complete");
    }
}

/// Handle to interact with a started job scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shared_state: Arc<RwLock<SharedJobState>>,
    shutdown_token: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SchedulerHandle {
    /// Run a job right away, outside its schedule.
    pub async fn trigger_now(&self, job_id: &str) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler is not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler is not running".to_string()))?
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    pub async fn is_job_running(&self, job_id: &str) -> bool {
        self.shared_state.read().await.running_jobs.contains(job_id)
    }

    /// Signal the scheduler to stop and wait for its loop to exit.
    pub async fn stop(&self) {
        self.shutdown_token.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Job scheduler task failed: {}", e);
            }
        }
    }
}
