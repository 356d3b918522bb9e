//! acceltune: accelerated compute backend selection and autotuning.
//!
//! Selects a concrete compute backend at process start — CUDA, a portable
//! wgpu GPU, or the CPU software fallback — and calibrates block-size
//! execution parameters for the specific physical device. Calibration is
//! persisted so repeated runs and sibling processes on the same machine
//! skip the expensive search.
//!
//! - **Runtime backend selection**: priority-ordered probing with a CPU
//!   fallback that never fails
//! - **Block-size autotuning**: empirical sweep over a representative
//!   matrix-multiplication workload, with early abort on resource
//!   exhaustion
//! - **Persistent calibration**: merge-on-read / first-writable-wins JSON
//!   records shared across processes
//! - **Thread affinity**: per-OS-thread native context binding through
//!   worker-pool lifecycle hooks
//!
//! # Quick Start
//!
//! ```ignore
//! use acceltune::{acquire_device, EngineConfig};
//!
//! let config = EngineConfig::default(); // backend = "auto"
//! let device = acquire_device(&config, &mut benchmark_factory)?;
//! let bs = device.device_info().get_block_size("matrix_multiplication", dtype, 0);
//! ```

pub mod autotuning;
pub mod config;
pub mod device;
pub mod device_info;
pub mod registry;
pub mod thread_pool;
pub mod types;

pub mod cpu_backend;
#[cfg(feature = "cuda")]
pub mod cuda_backend;
#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

pub use autotuning::{
    calibrate, CalibrationStore, DeviceRecords, Workload, WorkloadError, WorkloadFactory,
    WorkloadSpec,
};
pub use config::{EngineConfig, AUTO_BACKEND};
pub use device::{BlasHandle, Device, DeviceError, DeviceNotFoundError};
pub use device_info::{BlockTiming, DeviceInfo, KernelRecords, DEFAULT_BLOCK_SIZE, GEMM_KERNEL};
pub use registry::{BackendEntry, BackendRegistry, RegistryError};
pub use thread_pool::{HookId, WorkerHook, WorkerPool};
pub use types::{DeviceClass, Dtype};

/// Resolve a device per `config`, run conditional calibration, and return
/// the device ready to attach to worker pools.
pub fn acquire_device(
    config: &EngineConfig,
    factory: &mut dyn WorkloadFactory,
) -> Result<Box<dyn Device>, DeviceNotFoundError> {
    let registry = BackendRegistry::with_default_backends();
    let mut device = registry.resolve(config)?;
    autotuning::calibrate(device.as_mut(), factory, config);
    Ok(device)
}
