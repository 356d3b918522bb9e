//! The device abstraction shared by every backend variant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::device_info::DeviceInfo;
use crate::thread_pool::{pool_key, HookId, WorkerHook, WorkerPool};

/// No physical devices present, or an explicit device locator failed to
/// resolve. Fatal to backend acquisition; every other failure path is
/// absorbed internally with logging.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DeviceNotFoundError {
    message: String,
}

impl DeviceNotFoundError {
    pub fn new(message: impl Into<String>) -> Self {
        DeviceNotFoundError {
            message: message.into(),
        }
    }
}

/// Native failure surfaced by a device operation.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[cfg(feature = "cuda")]
    #[error("cuda driver error: {0}")]
    Cuda(String),
    #[cfg(feature = "wgpu")]
    #[error("wgpu poll error: {0}")]
    Wgpu(String),
}

/// Per-thread handle to the device's native linear-algebra library.
#[derive(Clone)]
pub enum BlasHandle {
    #[cfg(feature = "cuda")]
    Cublas(Arc<cudarc::cublas::CudaBlas>),
}

fn noop_hook() -> WorkerHook {
    Arc::new(|| {})
}

/// Contract every backend variant implements.
///
/// The object is shared process-wide; native context bindings are
/// per-OS-thread and established through the attach hooks.
pub trait Device: Send + Sync {
    /// Identifier of the backend that produced this device.
    fn backend_id(&self) -> &'static str;

    /// Id of the process that acquired the device.
    fn pid(&self) -> u32;

    fn device_info(&self) -> &DeviceInfo;

    fn device_info_mut(&mut self) -> &mut DeviceInfo;

    /// True once a native handle has been acquired.
    fn exists(&self) -> bool;

    /// Whether submitted operations complete asynchronously.
    fn is_async(&self) -> bool;

    /// Blocks the calling thread until all submitted work completes.
    fn sync(&self) -> Result<(), DeviceError>;

    /// Lazily constructed linear-algebra handle for the calling OS thread,
    /// destroyed when that thread's stop hook fires. `None` for variants
    /// without a native BLAS.
    fn blas(&self) -> Option<BlasHandle> {
        None
    }

    /// Attach bookkeeping shared by all variants.
    fn bindings(&self) -> &Arc<PoolBindings>;

    /// Hook run on every worker thread of an attached pool right after it
    /// starts; binds per-thread native state where the backend needs it.
    fn worker_start_hook(&self) -> WorkerHook {
        noop_hook()
    }

    /// Hook run on every worker thread just before it stops; tears down
    /// per-thread native state.
    fn worker_stop_hook(&self) -> WorkerHook {
        noop_hook()
    }

    /// Register the worker lifecycle hooks with `pool`. Attaching a pool
    /// that is already attached logs a warning and does nothing.
    fn attach(&self, pool: &Arc<dyn WorkerPool>) {
        let key = pool_key(pool);
        let bindings = self.bindings();
        let mut map = bindings.lock();
        if map.contains_key(&key) {
            log::warn!(
                "{}: already attached to pool {key:#x}",
                self.device_info().desc
            );
            return;
        }
        let start = pool.register_on_worker_start(self.worker_start_hook());
        let stop = pool.register_on_worker_stop(self.worker_stop_hook());
        let weak = Arc::downgrade(bindings);
        let shutdown = pool.register_on_shutdown(Arc::new(move || {
            if let Some(bindings) = weak.upgrade() {
                bindings.remove(key);
            }
        }));
        map.insert(
            key,
            Attachment {
                pool: Arc::clone(pool),
                start,
                stop,
                shutdown,
            },
        );
    }

    /// Remove the hooks registered by [`Device::attach`]. Detaching a pool
    /// that is not attached logs a warning and does nothing.
    fn detach(&self, pool: &Arc<dyn WorkerPool>) {
        let key = pool_key(pool);
        if !self.bindings().remove(key) {
            log::warn!(
                "{}: unable to detach from pool {key:#x}: not attached",
                self.device_info().desc
            );
        }
    }
}

struct Attachment {
    pool: Arc<dyn WorkerPool>,
    start: HookId,
    stop: HookId,
    shutdown: HookId,
}

impl Attachment {
    fn unregister(&self) {
        self.pool.unregister_worker_hook(self.start);
        self.pool.unregister_worker_hook(self.stop);
        self.pool.unregister_on_shutdown(self.shutdown);
    }
}

/// Set of currently attached pools, keyed by pool identity, each mapped to
/// its hook registrations. Dropping the owner detaches from every pool
/// still attached.
pub struct PoolBindings {
    inner: Mutex<HashMap<usize, Attachment>>,
}

impl PoolBindings {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(PoolBindings {
            inner: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Attachment>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, key: usize) -> bool {
        let entry = self.lock().remove(&key);
        match entry {
            Some(attachment) => {
                attachment.unregister();
                true
            }
            None => false,
        }
    }
}

impl Drop for PoolBindings {
    fn drop(&mut self) {
        let map = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, attachment) in map.drain() {
            attachment.unregister();
        }
    }
}
