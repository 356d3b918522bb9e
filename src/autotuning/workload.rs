//! Benchmark workload collaborator interface.
//!
//! Compiling and dispatching the representative matrix-multiplication
//! kernel belongs to the execution framework; the sweep only drives it.
//! A factory builds one workload per candidate block size, and the engine
//! drops it before moving to the next candidate so native resources are
//! reclaimed between measurements.

use thiserror::Error;

use crate::device::Device;
use crate::types::Dtype;

/// Problem size of the representative workload.
pub const BENCHMARK_SIZE: u32 = 3001;

/// Parameters of one benchmark candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub kernel: &'static str,
    pub dtype: Dtype,
    pub precision: u8,
    pub block_size: u32,
    pub size: u32,
}

/// Native failure raised while building or running a candidate.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The device ran out of resources for this candidate; larger block
    /// sizes are assumed to fail too.
    #[error("device out of resources: {0}")]
    OutOfResources(String),
    /// Any other native failure; only this candidate is skipped.
    #[error("workload execution failed: {0}")]
    Execution(String),
}

/// One executable instance of the representative workload.
pub trait Workload {
    /// Submit one full execution to the device. Completion is observed via
    /// [`Device::sync`], which the measurement harness calls.
    fn run(&mut self) -> Result<(), WorkloadError>;
}

/// Builds workload instances for sweep candidates.
pub trait WorkloadFactory {
    fn create(
        &mut self,
        device: &dyn Device,
        spec: &WorkloadSpec,
    ) -> Result<Box<dyn Workload>, WorkloadError>;
}
