// src/jobs/queue.rs
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;
use super::RefreshJob;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    Closed,
    Backend(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Work queue is closed"),
            Self::Backend(msg) => write!(f, "Work queue backend error: {}", msg),
        }
    }
}

impl std::error::Error for QueueError {}

/// Producer side of the refresh queue. Enqueue is fire-and-forget.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, job: RefreshJob) -> Result<(), QueueError>;
}

/// Consumer side of the refresh queue. `Ok(None)` means no more jobs will
/// ever arrive.
#[async_trait]
pub trait JobSource: Send {
    async fn next_job(&mut self) -> Result<Option<RefreshJob>, QueueError>;
}

/// In-process queue. Unbounded so that slow probes grow the queue instead of
/// stalling the scheduler.
#[derive(Clone)]
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<RefreshJob>,
}

pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<RefreshJob>,
}

pub fn channel() -> (ChannelQueue, ChannelSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelQueue { tx }, ChannelSource { rx })
}

#[async_trait]
impl WorkQueue for ChannelQueue {
    async fn enqueue(&self, job: RefreshJob) -> Result<(), QueueError> {
        self.tx.send(job).map_err(|_| QueueError::Closed)
    }
}

#[async_trait]
impl JobSource for ChannelSource {
    async fn next_job(&mut self) -> Result<Option<RefreshJob>, QueueError> {
        Ok(self.rx.recv().await)
    }
}
