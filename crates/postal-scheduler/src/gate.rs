use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchedulerError};

/// Counting gate bounding how many jobs may be pending at once.
///
/// Waiters are admitted as capacity frees up; no fairness beyond what the
/// underlying semaphore gives is promised.
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
    shutdown: CancellationToken,
}

/// One unit of gate capacity. Returned to the gate when released or dropped,
/// so it can never be returned twice.
#[derive(Debug)]
pub struct GateUnit {
    _permit: OwnedSemaphorePermit,
}

impl GateUnit {
    pub fn release(self) {}
}

impl AdmissionGate {
    /// `capacity` is clamped to at least one.
    pub fn new(capacity: usize, shutdown: CancellationToken) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            shutdown,
        }
    }

    /// Wait for a free unit. Fails with `ShuttingDown` once the shutdown
    /// token fires, including for callers already waiting.
    pub async fn acquire(&self) -> Result<GateUnit> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(SchedulerError::ShuttingDown),
            permit = Arc::clone(&self.permits).acquire_owned() => permit
                .map(|p| GateUnit { _permit: p })
                .map_err(|_| SchedulerError::ShuttingDown),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Units currently held by accepted jobs.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}
