// Bounded concurrency for pipeline runs

use crate::error::PipelineError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Limits how many `/process` requests run their pipeline at once
#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    acquire_timeout: Duration,
}

impl WorkerPool {
    pub fn new(max_workers: usize, acquire_timeout: Duration) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            acquire_timeout,
        }
    }

    /// Acquire a worker slot or report the server as busy
    pub async fn acquire(&self) -> Result<WorkerGuard, PipelineError> {
        let started = Instant::now();
        let permit = tokio::time::timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                PipelineError::Busy(format!(
                    "all {} workers occupied for {:?}",
                    self.max_workers, self.acquire_timeout
                ))
            })?
            .map_err(|_| PipelineError::Internal("worker pool closed".to_string()))?;

        Ok(WorkerGuard {
            _permit: permit,
            waited: started.elapsed(),
        })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.max_workers - self.available()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

/// Releases its worker slot on drop
pub struct WorkerGuard {
    _permit: OwnedSemaphorePermit,
    waited: Duration,
}

impl WorkerGuard {
    pub fn wait_time(&self) -> Duration {
        self.waited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_releases_slot() {
        let pool = WorkerPool::new(1, Duration::from_millis(50));
        {
            let _guard = pool.acquire().await.unwrap();
            assert_eq!(pool.in_use(), 1);
        }
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_busy_when_exhausted() {
        let pool = WorkerPool::new(1, Duration::from_millis(20));
        let _guard = pool.acquire().await.unwrap();
        assert!(matches!(pool.acquire().await, Err(PipelineError::Busy(_))));
    }

    #[test]
    fn test_wait_time_recorded() {
        let pool = WorkerPool::new(2, Duration::from_millis(50));
        let guard = tokio_test::block_on(pool.acquire());
        let guard = tokio_test::assert_ok!(guard);
        assert!(guard.wait_time() < Duration::from_millis(50));
        assert_eq!(pool.max_workers(), 2);
        assert_eq!(pool.in_use(), 1);
    }
}
