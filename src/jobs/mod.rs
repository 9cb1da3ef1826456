// src/jobs/mod.rs
pub mod executor;
pub mod queue;
pub mod scheduler;
pub mod worker;

use std::fmt;
use uuid::Uuid;
use crate::models::server::{Kind, ServerAddress, Snapshot};
use crate::probe::ProbeError;

/// One request to refresh one address for one kind. Consumed once by a
/// worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshJob {
    pub id: Uuid,
    pub address: ServerAddress,
    pub kind: Kind,
}

impl RefreshJob {
    pub fn new(address: ServerAddress, kind: Kind) -> Self {
        Self {
            id: Uuid::new_v4(),
            address,
            kind,
        }
    }
}

impl fmt::Display for RefreshJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} job {}: {}", self.kind, self.id, self.address)
    }
}

#[derive(Debug)]
pub enum Outcome {
    Success(Snapshot),
    Failure(ProbeError),
    Timeout,
}
