//! Bounded worker pool shared by every collaborator call of a run
//!
//! A slot covers a single collaborator call. It is released before any
//! backoff sleep and is never acquired twice by the same job.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Limits how many collaborator calls are in flight at once
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for a free worker slot, held until the permit is dropped
    pub async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        // The semaphore is never closed, so acquisition only fails after a
        // close that this type does not expose.
        self.permits.acquire().await.ok()
    }

    /// Run `task` once a worker slot is free
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        task.await
    }
}
