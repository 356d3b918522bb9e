//! Block-size autotuning engine.
//!
//! For each (dtype, precision level) pair the engine sweeps candidate block
//! sizes of a fixed-size representative matrix-multiplication workload and
//! records the candidate with the minimum measured time. Results are merged
//! into the persistent calibration records and ratings are recomputed from
//! the full record set.
//!
//! The sweep is single-threaded and synchronous, runs once at setup time,
//! and blocks its caller for the full search duration.

pub mod cache;
pub mod measure;
pub mod rating;
pub mod workload;

pub use cache::{CalibrationStore, DeviceRecords, RECORDS_FILE};
pub use measure::BENCH_REPEATS;
pub use rating::{compute_ratings, RatingMap};
pub use workload::{Workload, WorkloadError, WorkloadFactory, WorkloadSpec, BENCHMARK_SIZE};

use crate::config::EngineConfig;
use crate::device::Device;
use crate::device_info::{BlockTiming, DtypeRecords, KernelRecords, PrecisionRecords, GEMM_KERNEL};
use crate::types::Dtype;

/// Summation precision levels the sweep calibrates.
pub const PRECISION_LEVELS: [u8; 3] = [0, 1, 2];

/// Smallest candidate block size.
const MIN_BLOCK_SIZE: u32 = 8;

/// Conditionally run the sweep for `device`, persist the updated records,
/// and refresh the device's rating and calibration state from the full
/// merged record set.
///
/// The sweep runs only if the device is unknown to the cache and
/// `test_unknown_device` is set, or known and `test_known_device` is set;
/// otherwise cached values are trusted.
pub fn calibrate(device: &mut dyn Device, factory: &mut dyn WorkloadFactory, config: &EngineConfig) {
    let store = CalibrationStore::new(&config.device_dirs);
    let mut records = store.load_merged();
    let desc = device.device_info().desc.clone();

    let known = records.contains_key(&desc);
    let retest = (!known && config.test_unknown_device) || (known && config.test_known_device);
    if retest {
        log::warn!(
            "{}, running a quick block-size benchmark now",
            if known {
                "forced device retest"
            } else {
                "device has not been calibrated yet"
            }
        );
        let tuned = run_sweep(device, factory);
        records.insert(desc.clone(), tuned);
        store.save(&records);
    }

    let ratings = compute_ratings(&records);
    let info = device.device_info_mut();
    if let Some(rating) = ratings.get(&desc) {
        info.rating = rating.clone();
    }
    if let Some(tuned) = records.get(&desc) {
        info.device_info = tuned.clone();
    }

    let info = device.device_info();
    for dtype in Dtype::ALL {
        let rating = info
            .rating
            .get(&dtype)
            .map(|r| format!("{r:.3}"))
            .unwrap_or_default();
        log::info!(
            "selected {}: dtype={dtype} rating={rating} block_size={} version={}",
            info.desc,
            info.get_block_size(GEMM_KERNEL, dtype, config.precision_level),
            info.version
        );
    }
}

/// Run the full sweep for every dtype (lexicographic order) and precision
/// level, returning the freshly measured kernel records for the device.
pub fn run_sweep(device: &dyn Device, factory: &mut dyn WorkloadFactory) -> KernelRecords {
    let mut dtypes = DtypeRecords::new();
    for dtype in Dtype::ALL {
        let mut precisions = PrecisionRecords::new();
        for level in PRECISION_LEVELS {
            if let Some((block_size, seconds)) = sweep_pair(device, factory, dtype, level) {
                precisions.insert(level.to_string(), BlockTiming::square(block_size, seconds));
            }
        }
        dtypes.insert(dtype.as_str().to_string(), precisions);
    }
    let mut kernels = KernelRecords::new();
    kernels.insert(GEMM_KERNEL.to_string(), dtypes);
    kernels
}

/// Sweep one (dtype, precision) pair, returning the best candidate.
///
/// Out-of-resources failures abort the remaining sweep for the pair (larger
/// sizes are assumed to fail too); other native failures skip only the
/// candidate. Returns `None` if no candidate succeeded.
fn sweep_pair(
    device: &dyn Device,
    factory: &mut dyn WorkloadFactory,
    dtype: Dtype,
    precision: u8,
) -> Option<(u32, f64)> {
    let info = device.device_info();
    let max_block_size = info.max_block_size(dtype);
    let (mut block_size, step) = if info.vector_opt() {
        (MIN_BLOCK_SIZE & !3, 4)
    } else {
        (MIN_BLOCK_SIZE, 1)
    };
    if max_block_size < block_size {
        log::warn!(
            "{}: geometry admits no block size >= {block_size} for dtype {dtype}",
            info.desc
        );
        return None;
    }

    let mut best: Option<(u32, f64)> = None;
    while block_size <= max_block_size {
        log::info!(
            "testing {GEMM_KERNEL} dtype={dtype} precision_level={precision} \
             block_size={block_size}"
        );
        let spec = WorkloadSpec {
            kernel: GEMM_KERNEL,
            dtype,
            precision,
            block_size,
            size: BENCHMARK_SIZE,
        };
        let outcome = factory.create(device, &spec).and_then(|mut candidate| {
            let result = measure::min_elapsed(device, candidate.as_mut(), BENCH_REPEATS);
            // Dropping the candidate releases its native resources before
            // the next one is built.
            drop(candidate);
            result
        });
        match outcome {
            Ok(seconds) => {
                if best.map_or(true, |(_, best_seconds)| seconds < best_seconds) {
                    best = Some((block_size, seconds));
                }
            }
            Err(WorkloadError::OutOfResources(e)) => {
                log::warn!(
                    "block size {block_size} exhausted device resources ({e}); \
                     stopping the sweep for dtype {dtype} precision {precision}"
                );
                break;
            }
            Err(e) => {
                log::warn!("failed to evaluate block size {block_size}: {e}");
            }
        }
        block_size += step;
    }
    best
}
