// Bounded access to the OCR and feature-extraction collaborators

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps how many inference calls are in flight across all grouping requests
#[derive(Clone)]
pub struct InferencePool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
}

impl InferencePool {
    pub fn new(capacity: usize, acquire_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            acquire_timeout,
        }
    }

    /// Wait for a slot, giving up after the acquire timeout
    pub async fn acquire(&self) -> Result<InferenceSlot, InferencePoolError> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| InferencePoolError::Timeout(self.acquire_timeout))?
            .map_err(|_| InferencePoolError::Closed)?;

        Ok(InferenceSlot { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Held for the duration of one collaborator call; the slot frees on drop
pub struct InferenceSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferencePoolError {
    Timeout(Duration),
    Closed,
}

impl std::fmt::Display for InferencePoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferencePoolError::Timeout(d) => write!(f, "No inference slot free after {:?}", d),
            InferencePoolError::Closed => write!(f, "Inference pool closed"),
        }
    }
}

impl std::error::Error for InferencePoolError {}
