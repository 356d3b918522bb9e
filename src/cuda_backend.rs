//! CUDA variant.
//!
//! A CUDA context binds per OS thread, not per process: every worker thread
//! of an attached pool must bind the context before first use and tear down
//! its thread-local state before terminating, or calls silently target the
//! wrong (or no) context. The start/stop hooks carry that binding; cuBLAS
//! handles are created lazily, one per OS thread, and dropped by the stop
//! hook of the thread that owns them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use cudarc::cublas::CudaBlas;
use cudarc::driver::{result, sys, CudaContext, CudaStream};

use crate::config::EngineConfig;
use crate::device::{BlasHandle, Device, DeviceError, DeviceNotFoundError, PoolBindings};
use crate::device_info::DeviceInfo;
use crate::registry::BackendEntry;
use crate::thread_pool::WorkerHook;
use crate::types::DeviceClass;

pub const BACKEND_ID: &str = "cuda";
pub const PRIORITY: i32 = 30;

/// Buffer alignment the driver guarantees for device allocations.
const MEMALIGN: u32 = 4096;

pub fn backend_entry() -> BackendEntry {
    BackendEntry {
        id: BACKEND_ID,
        priority: PRIORITY,
        probe,
        acquire: |config| CudaDevice::acquire(config).map(|d| Box::new(d) as Box<dyn Device>),
    }
}

fn probe() -> bool {
    result::init().is_ok() && CudaContext::device_count().map(|n| n > 0).unwrap_or(false)
}

type BlasMap = Arc<Mutex<HashMap<ThreadId, Arc<CudaBlas>>>>;

pub struct CudaDevice {
    info: DeviceInfo,
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    blas: BlasMap,
    pid: u32,
    bindings: Arc<PoolBindings>,
}

impl CudaDevice {
    pub fn acquire(config: &EngineConfig) -> Result<CudaDevice, DeviceNotFoundError> {
        let count = match CudaContext::device_count() {
            Ok(n) if n > 0 => n as usize,
            _ => return Err(DeviceNotFoundError::new("no CUDA devices were found")),
        };
        let ordinal = parse_locator(&config.device, count)?;
        let ctx = CudaContext::new(ordinal).map_err(|e| {
            DeviceNotFoundError::new(format!("failed to create CUDA context: {e}"))
        })?;
        let info = build_device_info(&ctx)
            .map_err(|e| DeviceNotFoundError::new(format!("failed to query device: {e}")))?;
        let stream = ctx.default_stream();
        Ok(CudaDevice {
            info,
            ctx,
            stream,
            blas: Arc::new(Mutex::new(HashMap::new())),
            pid: std::process::id(),
            bindings: PoolBindings::new(),
        })
    }
}

fn parse_locator(locator: &str, count: usize) -> Result<usize, DeviceNotFoundError> {
    if locator.is_empty() {
        return Ok(0);
    }
    let ordinal: usize = locator.trim().parse().map_err(|_| {
        DeviceNotFoundError::new(format!(
            "CUDA device locator \"{locator}\" is not an ordinal"
        ))
    })?;
    if ordinal >= count {
        return Err(DeviceNotFoundError::new(format!(
            "CUDA device {ordinal} was not found ({count} available)"
        )));
    }
    Ok(ordinal)
}

fn build_device_info(ctx: &Arc<CudaContext>) -> Result<DeviceInfo, cudarc::driver::DriverError> {
    use sys::CUdevice_attribute as Attr;

    let major = ctx.attribute(Attr::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?;
    let minor = ctx.attribute(Attr::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?;
    let max_threads = ctx.attribute(Attr::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)?;
    let block_dims = [
        ctx.attribute(Attr::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X)?,
        ctx.attribute(Attr::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y)?,
        ctx.attribute(Attr::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z)?,
    ];
    let shared_mem = ctx.attribute(Attr::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK)?;
    ctx.bind_to_thread()?;
    let (_free, total) = result::mem_get_info()?;

    Ok(DeviceInfo {
        desc: format!("NVIDIA/{}/{}", ctx.name()?.trim(), ctx.ordinal()),
        memsize: total as u64,
        memalign: MEMALIGN,
        version: format!("{major}.{minor}"),
        device_class: DeviceClass::Gpu,
        max_work_group_size: max_threads as u32,
        max_work_item_sizes: block_dims.iter().map(|&d| d as u32).collect(),
        local_memsize: shared_mem as u64,
        rating: Default::default(),
        device_info: Default::default(),
    })
}

impl Device for CudaDevice {
    fn backend_id(&self) -> &'static str {
        BACKEND_ID
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn device_info_mut(&mut self) -> &mut DeviceInfo {
        &mut self.info
    }

    fn exists(&self) -> bool {
        true
    }

    fn is_async(&self) -> bool {
        true
    }

    fn sync(&self) -> Result<(), DeviceError> {
        self.stream
            .synchronize()
            .map_err(|e| DeviceError::Cuda(format!("{e:?}")))
    }

    fn blas(&self) -> Option<BlasHandle> {
        let tid = std::thread::current().id();
        let mut map = self.blas.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(blas) = map.get(&tid) {
            return Some(BlasHandle::Cublas(Arc::clone(blas)));
        }
        match CudaBlas::new(self.stream.clone()) {
            Ok(blas) => {
                let blas = Arc::new(blas);
                map.insert(tid, Arc::clone(&blas));
                Some(BlasHandle::Cublas(blas))
            }
            Err(e) => {
                log::warn!("{}: failed to create cuBLAS handle: {e:?}", self.info.desc);
                None
            }
        }
    }

    fn bindings(&self) -> &Arc<PoolBindings> {
        &self.bindings
    }

    fn worker_start_hook(&self) -> WorkerHook {
        let ctx = Arc::clone(&self.ctx);
        let desc = self.info.desc.clone();
        Arc::new(move || {
            if let Err(e) = ctx.bind_to_thread() {
                log::warn!("{desc}: failed to bind context to worker thread: {e:?}");
            }
        })
    }

    fn worker_stop_hook(&self) -> WorkerHook {
        let blas = Arc::clone(&self.blas);
        Arc::new(move || {
            let tid = std::thread::current().id();
            let handle = blas.lock().unwrap_or_else(|e| e.into_inner()).remove(&tid);
            drop(handle);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_parsing() {
        assert_eq!(parse_locator("", 2).unwrap(), 0);
        assert_eq!(parse_locator("1", 2).unwrap(), 1);
        assert!(parse_locator("2", 2).is_err());
        assert!(parse_locator("0:1", 2).is_err());
    }

    #[test]
    fn acquire_errors_without_devices() {
        if probe() {
            return;
        }
        let config = EngineConfig {
            backend: BACKEND_ID.to_string(),
            ..EngineConfig::default()
        };
        assert!(CudaDevice::acquire(&config).is_err());
    }
}
