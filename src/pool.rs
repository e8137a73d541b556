//! Worker pool shared by every watcher of one monitor.
use std::fmt::{Debug, Formatter};
use std::future::Future;

use tokio::runtime::{Builder, EnterGuard, Handle, Runtime};

use crate::error::{Error, Result};

pub const DEFAULT_WORKER_THREADS: usize = 2;

/// A fixed-size pool of worker threads, owned by and scoped to one monitor.
///
/// Producers and consumers of all watchers run here, so the number of threads doesn't
/// grow with the number of watched directories.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl WorkerPool {
    /// Build a pool with `worker_threads` threads (at least one).
    ///
    /// # Errors
    /// Return error when the threads or the IO driver can't be set up.
    pub fn new(worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("fsmonitor-worker")
            .enable_io()
            .build()
            .map_err(Error::Runtime)?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    /// A cheap handle for spawning onto this pool. It doesn't keep the pool alive.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            handle: self.handle.clone(),
        }
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle().spawn(future);
    }
}

/// Spawns tasks onto a [`WorkerPool`](WorkerPool).
#[derive(Debug, Clone)]
pub struct PoolHandle {
    handle: Handle,
}

impl PoolHandle {
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.handle.spawn(future));
    }

    /// Enter the pool's runtime context, so native resources can register with its IO driver.
    pub fn enter(&self) -> EnterGuard<'_> {
        self.handle.enter()
    }
}

impl Debug for WorkerPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").finish_non_exhaustive()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Shutting down in the background doesn't block, so the pool may be dropped from one
        // of its own workers.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
