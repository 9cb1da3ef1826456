// src/jobs/scheduler.rs
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use super::queue::{QueueError, WorkQueue};
use super::RefreshJob;
use crate::storage::memory::Registry;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Enqueues a refresh job for every tracked (address, kind) on a fixed
/// period, starting immediately. Passes never wait for their jobs.
pub struct RefreshScheduler {
    registry: Arc<Registry>,
    queue: Arc<dyn WorkQueue>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(registry: Arc<Registry>, queue: Arc<dyn WorkQueue>, interval: Duration) -> Self {
        Self {
            registry,
            queue,
            interval,
        }
    }

    /// Returns the number of jobs queued. A queue error aborts the rest of
    /// the pass; the next tick starts over.
    pub async fn refresh_pass(&self) -> Result<usize, QueueError> {
        let mut jobs = Vec::with_capacity(self.registry.len());
        self.registry
            .for_each(|entry| jobs.push(RefreshJob::new(entry.address.clone(), entry.kind)));

        let total = jobs.len();
        for job in jobs {
            self.queue.enqueue(job).await?;
        }
        Ok(total)
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.refresh_pass().await {
                Ok(total) => info!("Queued {} refresh jobs", total),
                Err(e) => error!("Refresh pass failed, retrying next tick: {}", e),
            }
        }
    }
}
