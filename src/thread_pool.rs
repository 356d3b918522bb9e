//! Worker-pool collaborator interface.
//!
//! The execution framework owns the thread pools; the core only needs to
//! observe worker-thread lifecycles so that per-thread native state (context
//! bindings, BLAS handles) can be set up and torn down. A device registers
//! two hooks on attach — *on worker start* and *on worker stop* — both
//! executed on the worker thread being created or destroyed, plus a
//! shutdown hook that detaches the device when the pool goes away.

use std::sync::Arc;

/// Callback executed on a worker thread as it starts or stops, or on the
/// pool-owning thread at shutdown.
pub type WorkerHook = Arc<dyn Fn() + Send + Sync>;

/// Opaque registration handle, passed back to the matching unregister call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

/// Contract a thread pool must offer for devices to attach to it.
///
/// Unregistering a hook from within that same hook (a shutdown hook
/// detaching its own registration) must be supported.
pub trait WorkerPool: Send + Sync {
    /// Register a hook to run on every worker thread right after it starts.
    fn register_on_worker_start(&self, hook: WorkerHook) -> HookId;
    /// Register a hook to run on every worker thread just before it stops.
    fn register_on_worker_stop(&self, hook: WorkerHook) -> HookId;
    /// Remove a previously registered start/stop hook.
    fn unregister_worker_hook(&self, id: HookId);
    /// Register a hook to run once when the pool shuts down.
    fn register_on_shutdown(&self, hook: WorkerHook) -> HookId;
    /// Remove a previously registered shutdown hook.
    fn unregister_on_shutdown(&self, id: HookId);
}

/// Stable identity of a pool for attach bookkeeping.
pub(crate) fn pool_key(pool: &Arc<dyn WorkerPool>) -> usize {
    Arc::as_ptr(pool).cast::<()>() as usize
}
