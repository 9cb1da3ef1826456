// src/jobs/executor.rs
use log::debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use super::Outcome;
use crate::models::server::{Kind, ServerAddress, Snapshot};
use crate::probe::{ProbeClient, ProbeError};

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Runs a single probe against a deadline.
///
/// The probe runs on its own task and reports through a oneshot slot. The
/// sender is consumed by its one `send`, and once the deadline has passed
/// the receiver is gone, so a late result has nowhere to land and is dropped
/// inside the probe task. Only the returned `Outcome` ever reaches the
/// registry.
pub struct JobExecutor {
    probe: Arc<dyn ProbeClient>,
}

impl JobExecutor {
    pub fn new(probe: Arc<dyn ProbeClient>) -> Self {
        Self { probe }
    }

    pub async fn execute(&self, address: &ServerAddress, kind: Kind, deadline: Duration) -> Outcome {
        let (slot, result) = oneshot::channel::<Result<Snapshot, ProbeError>>();
        let probe = Arc::clone(&self.probe);
        let target = address.clone();

        // Not aborted on timeout: the probe has no cancellation contract and
        // is bounded by its own I/O timeouts.
        tokio::spawn(async move {
            let started = Instant::now();
            let snapshot = match kind {
                Kind::Status => probe
                    .probe_status(&target)
                    .await
                    .map(|r| Snapshot::status(r, started.elapsed())),
                Kind::Query => probe
                    .probe_query(&target)
                    .await
                    .map(|r| Snapshot::query(r, started.elapsed())),
            };

            if slot.send(snapshot).is_err() {
                debug!("Discarding late {} result for {}", kind, target);
            }
        });

        match tokio::time::timeout(deadline, result).await {
            Ok(Ok(Ok(snapshot))) => Outcome::Success(snapshot),
            Ok(Ok(Err(e))) => Outcome::Failure(e),
            // sender dropped without sending, i.e. the probe task panicked
            Ok(Err(_)) => Outcome::Failure(ProbeError::Abandoned),
            Err(_) => Outcome::Timeout,
        }
    }
}
