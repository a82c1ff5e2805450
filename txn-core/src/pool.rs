//! Shared worker pool
//!
//! Phases run as tasks on one runtime. The pool also bounds how many
//! transactions may actively hold a worker; a paused transaction gives its
//! permit back until it is resumed.

use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Runtime handle plus admission permits
#[derive(Debug, Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Pool on the current runtime. Panics outside a runtime, like
    /// `tokio::spawn`.
    pub fn new(size: usize) -> Result<Self> {
        Self::with_handle(Handle::current(), size)
    }

    /// Pool on an explicit runtime
    pub fn with_handle(handle: Handle, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("worker pool size must be positive".to_string()));
        }
        Ok(Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    /// Run a task on the pool's runtime
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(task)
    }

    /// Wait for a worker permit
    pub async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Shutdown("worker pool closed".to_string()))
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Configured size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Refuse further admissions
    pub fn close(&self) {
        self.permits.close();
    }
}
