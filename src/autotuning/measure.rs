//! Measurement harness for sweep candidates.

use std::time::Instant;

use crate::autotuning::workload::{Workload, WorkloadError};
use crate::device::Device;

/// Timed repetitions per candidate; the minimum is kept.
pub const BENCH_REPEATS: usize = 3;

/// Run `workload` once untimed (excludes one-time compile and cache
/// effects), then `repeats` times timed, returning the minimum elapsed
/// wall-clock seconds. Every execution is followed by [`Device::sync`] so
/// asynchronous submission is included in the measurement.
pub fn min_elapsed(
    device: &dyn Device,
    workload: &mut dyn Workload,
    repeats: usize,
) -> Result<f64, WorkloadError> {
    workload.run()?;
    sync(device)?;

    let mut best = f64::INFINITY;
    for _ in 0..repeats {
        let start = Instant::now();
        workload.run()?;
        sync(device)?;
        let elapsed = start.elapsed().as_secs_f64();
        if elapsed < best {
            best = elapsed;
        }
    }
    Ok(best)
}

fn sync(device: &dyn Device) -> Result<(), WorkloadError> {
    device
        .sync()
        .map_err(|e| WorkloadError::Execution(e.to_string()))
}
