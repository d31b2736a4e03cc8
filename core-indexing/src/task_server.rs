//! # Task Server
//!
//! Dispatches named jobs onto the durable [`JobQueue`] and runs them on a
//! bounded pool of workers.
//!
//! ## Overview
//!
//! - `send_task` writes a job and returns immediately.
//! - `launch_workers` starts one poll loop per configured worker. A loop
//!   holds at most `concurrency` jobs in flight (one semaphore permit each),
//!   claims the next due job whenever a permit is free and runs its handler
//!   on a separate task under the job timeout.
//! - `shutdown` stops polling and waits for in-flight jobs to finish.
//!
//! Delivery is at-least-once: a job whose worker dies keeps its lease until
//! it expires and is then claimed again. Handlers must tolerate re-runs.
//! The lease outlasts the job timeout by [`LEASE_GRACE`], so a timed-out
//! delivery still owns the job when its failure is recorded.
//!
//! ## Usage
//!
//! ```ignore
//! let mut server = TaskServer::connect(pool.clone(), &config, events.clone()).await?;
//! server.register(Arc::new(IndexUserHandler::new(indexer)));
//! server.register(Arc::new(TestTaskHandler));
//! server.launch_workers();
//!
//! let job_id = server.send_index_user_task("flicker", &token).await?;
//! // ...
//! server.shutdown().await;
//! ```

use crate::error::{IndexingError, Result};
use crate::job::{Job, JobId};
use crate::queue::{JobQueue, QueueStats};
use async_trait::async_trait;
use core_runtime::config::{IndexerConfig, WorkerConfig};
use core_runtime::events::{CoreEvent, EventBus, JobEvent};
use core_runtime::logging::redact_if_sensitive;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Task name of the per-user ingestion job.
pub const INDEX_USER_TASK: &str = "index_user";

/// Task name of the diagnostic job.
pub const TEST_TASK: &str = "test_task";

/// Time a claim stays leased beyond the job timeout.
pub const LEASE_GRACE: Duration = Duration::from_secs(30);

/// Handler for one named task
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Task name this handler is registered under
    fn name(&self) -> &str;

    /// Run one delivery of a job with its positional arguments.
    async fn run(&self, args: &[String]) -> Result<()>;
}

type HandlerMap = HashMap<String, Arc<dyn JobHandler>>;

/// State shared by every worker loop and job task
struct WorkerContext {
    queue: Arc<JobQueue>,
    handlers: HandlerMap,
    events: EventBus,
    job_timeout: Duration,
    lease: Duration,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

pub struct TaskServer {
    queue: Arc<JobQueue>,
    handlers: HandlerMap,
    workers: Vec<WorkerConfig>,
    job_timeout: Duration,
    poll_interval: Duration,
    results_expire_in: Duration,
    events: EventBus,
    shutdown: CancellationToken,
    running: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskServer {
    pub fn new(queue: Arc<JobQueue>, config: &IndexerConfig, events: EventBus) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            workers: config.workers.clone(),
            job_timeout: config.job_timeout,
            poll_interval: config.poll_interval,
            results_expire_in: config.results_expire_in,
            events,
            shutdown: CancellationToken::new(),
            running: Mutex::new(Vec::new()),
        }
    }

    /// Task server over the `job_queue` table in `pool`.
    pub async fn connect(pool: SqlitePool, config: &IndexerConfig, events: EventBus) -> Result<Self> {
        let queue = JobQueue::new(pool, config.max_attempts).await?;
        Ok(Self::new(Arc::new(queue), config, events))
    }

    /// Register `handler` under its task name, replacing any previous one.
    ///
    /// Handlers registered after `launch_workers` are only seen by workers
    /// launched later.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let name = handler.name().to_string();
        debug!(task = %name, "Registered task handler");
        self.handlers.insert(name, handler);
    }

    pub fn registered_tasks(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Enqueue `task_name` with positional `args`. Does not wait for it to run.
    pub async fn send_task(&self, task_name: &str, args: Vec<String>) -> Result<JobId> {
        let job_id = self.queue.enqueue(task_name, args).await?;

        info!(job_id = %job_id, task = task_name, "Task sent");
        self.events
            .emit(CoreEvent::Job(JobEvent::Enqueued {
                job_id: job_id.to_string(),
                task_name: task_name.to_string(),
            }))
            .ok();

        Ok(job_id)
    }

    /// Enqueue ingestion of `username`'s history, fetched with `token`.
    pub async fn send_index_user_task(&self, username: &str, token: &str) -> Result<JobId> {
        debug!(
            user = username,
            token = %redact_if_sensitive("token", token),
            "Sending index_user task"
        );
        self.send_task(INDEX_USER_TASK, vec![username.to_string(), token.to_string()])
            .await
    }

    pub async fn send_test_task(&self, message: &str, token: &str) -> Result<JobId> {
        self.send_task(TEST_TASK, vec![message.to_string(), token.to_string()])
            .await
    }

    /// Start a poll loop for every configured worker.
    pub fn launch_workers(&self) {
        let context = Arc::new(WorkerContext {
            queue: Arc::clone(&self.queue),
            handlers: self.handlers.clone(),
            events: self.events.clone(),
            job_timeout: self.job_timeout,
            lease: self.job_timeout.saturating_add(LEASE_GRACE),
            poll_interval: self.poll_interval,
            shutdown: self.shutdown.clone(),
        });

        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        for worker in &self.workers {
            info!(
                worker = %worker.name,
                concurrency = worker.concurrency,
                tasks = ?self.registered_tasks(),
                "Launching worker"
            );
            let span = info_span!("worker", name = %worker.name);
            running.push(tokio::spawn(
                run_worker(Arc::clone(&context), worker.clone()).instrument(span),
            ));
        }
    }

    /// Stop claiming jobs and wait for every in-flight job to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down task server");
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.drain(..).collect()
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker loop panicked");
            }
        }

        info!("Task server stopped");
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.queue.get_job(job_id).await
    }

    pub async fn failed_jobs(&self) -> Result<Vec<Job>> {
        self.queue.failed_jobs().await
    }

    /// Delete completed jobs that finished more than `older_than` ago.
    pub async fn cleanup_completed(&self, older_than: Duration) -> Result<u64> {
        self.queue.cleanup_completed(older_than).await
    }

    /// Delete completed jobs older than the configured result expiry.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        self.cleanup_completed(self.results_expire_in).await
    }
}

async fn run_worker(context: Arc<WorkerContext>, worker: WorkerConfig) {
    let permits = Arc::new(Semaphore::new(worker.concurrency));
    let mut in_flight = JoinSet::new();

    loop {
        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                error!(error = %e, "Job task panicked");
            }
        }

        let permit = tokio::select! {
            _ = context.shutdown.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match context.queue.claim(&worker.name, context.lease).await {
            Ok(Some(job)) => {
                let context = Arc::clone(&context);
                let worker_name = worker.name.clone();
                let span = info_span!("job", job_id = %job.id, task = %job.task_name);
                in_flight.spawn(
                    async move {
                        execute(&context, &worker_name, job).await;
                        drop(permit);
                    }
                    .instrument(span),
                );
                continue;
            }
            Ok(None) => drop(permit),
            Err(e) => {
                drop(permit);
                warn!(error = %e, "Failed to poll job queue");
            }
        }

        tokio::select! {
            _ = context.shutdown.cancelled() => break,
            _ = tokio::time::sleep(context.poll_interval) => {}
        }
    }

    debug!(in_flight = in_flight.len(), "Worker stopping, draining in-flight jobs");
    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            error!(error = %e, "Job task panicked");
        }
    }
}

async fn execute(context: &WorkerContext, worker: &str, job: Job) {
    let job_id = job.id.to_string();
    context
        .events
        .emit(CoreEvent::Job(JobEvent::Started {
            job_id: job_id.clone(),
            task_name: job.task_name.clone(),
            worker: worker.to_string(),
            attempt: job.attempts,
        }))
        .ok();

    let started = Instant::now();
    let outcome = match context.handlers.get(&job.task_name) {
        Some(handler) => match tokio::time::timeout(context.job_timeout, handler.run(&job.args)).await {
            Ok(result) => result,
            Err(_) => Err(IndexingError::Timeout(context.job_timeout.as_secs())),
        },
        None => Err(IndexingError::UnknownTask(job.task_name.clone())),
    };

    match outcome {
        Ok(()) => {
            match context.queue.mark_complete(&job).await {
                Ok(()) => {}
                Err(IndexingError::LeaseLost { .. }) => {
                    warn!(attempt = job.attempts, "Lease lost before completion was recorded");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Failed to record job completion");
                    return;
                }
            }
            context
                .events
                .emit(CoreEvent::Job(JobEvent::Completed {
                    job_id,
                    task_name: job.task_name,
                    duration_ms: started.elapsed().as_millis() as u64,
                }))
                .ok();
        }
        Err(failure) => {
            let message = failure.to_string();
            let will_retry = match context
                .queue
                .mark_failed(&job, message.clone(), failure.is_retryable())
                .await
            {
                Ok(will_retry) => will_retry,
                Err(IndexingError::LeaseLost { .. }) => {
                    warn!(
                        attempt = job.attempts,
                        error = %message,
                        "Lease lost before failure was recorded"
                    );
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Failed to record job failure");
                    return;
                }
            };
            context
                .events
                .emit(CoreEvent::Job(JobEvent::Failed {
                    job_id,
                    task_name: job.task_name,
                    message,
                    will_retry,
                }))
                .ok();
        }
    }
}
