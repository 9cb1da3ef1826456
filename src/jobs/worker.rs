// src/jobs/worker.rs
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use super::executor::JobExecutor;
use super::queue::{JobSource, QueueError};
use super::{Outcome, RefreshJob};
use crate::models::server::Snapshot;
use crate::storage::memory::Registry;

/// Consumes refresh jobs with at most `concurrency` running at once. Jobs
/// beyond that stay in the queue.
pub struct WorkerPool {
    executor: Arc<JobExecutor>,
    registry: Arc<Registry>,
    concurrency: usize,
    deadline: Duration,
}

impl WorkerPool {
    pub fn new(executor: Arc<JobExecutor>, registry: Arc<Registry>, concurrency: usize, deadline: Duration) -> Self {
        Self {
            executor,
            registry,
            concurrency: concurrency.max(1),
            deadline,
        }
    }

    /// Runs until the source is exhausted or fails, then waits for the jobs
    /// already started.
    pub async fn run<S: JobSource>(&self, mut source: S) -> Result<(), QueueError> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();
        info!("Worker pool started with {} workers", self.concurrency);

        let result = loop {
            // Take a permit before a job so waiting work stays queued.
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break Ok(());
            };

            let next = loop {
                tokio::select! {
                    next = source.next_job() => break next,
                    Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(e) = done {
                            error!("Refresh job task failed: {}", e);
                        }
                    }
                }
            };

            let job = match next {
                Ok(Some(job)) => job,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            let executor = Arc::clone(&self.executor);
            let registry = Arc::clone(&self.registry);
            let deadline = self.deadline;
            in_flight.spawn(async move {
                let _permit = permit;
                job_middleware(&job);
                let outcome = executor.execute(&job.address, job.kind, deadline).await;
                apply_outcome(&registry, &job, outcome, deadline);
            });
        };

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                error!("Refresh job task failed: {}", e);
            }
        }

        if let Err(e) = &result {
            error!("Worker pool stopped: {}", e);
        }
        result
    }
}

fn job_middleware(job: &RefreshJob) {
    debug!("Running {}", job);
}

/// Writes the outcome of one job. Timeouts write nothing, so a snapshot
/// can only come from a result that arrived before the deadline.
pub(crate) fn apply_outcome(registry: &Registry, job: &RefreshJob, outcome: Outcome, deadline: Duration) {
    match outcome {
        Outcome::Success(snapshot) => {
            debug!("Refreshed {}", job);
            registry.put(&job.address, snapshot);
        }
        Outcome::Failure(e) => {
            if e.is_permanent() {
                warn!("{} failed permanently: {}", job, e);
            } else {
                info!("{} failed: {}", job, e);
            }
            registry.put(&job.address, Snapshot::failed(job.kind, e.to_string()));
        }
        Outcome::Timeout => {
            warn!("{} took longer than {:?}", job, deadline);
        }
    }
}
