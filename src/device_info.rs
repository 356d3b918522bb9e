//! Per-device description, capacity limits and calibration results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceClass, Dtype};

/// Kernel name the benchmark calibrates and the lookup falls back to.
pub const GEMM_KERNEL: &str = "matrix_multiplication";

/// Block size returned when the degradation chain runs dry.
pub const DEFAULT_BLOCK_SIZE: u32 = 8;

/// One calibration measurement: block dimensions and elapsed seconds.
///
/// Serializes as `[[dims...], seconds]`, the on-disk unit of the record
/// files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTiming(pub Vec<u32>, pub f64);

impl BlockTiming {
    /// Square tile of the given edge length.
    pub fn square(block_size: u32, seconds: f64) -> Self {
        BlockTiming(vec![block_size, block_size], seconds)
    }

    pub fn block_size(&self) -> Option<u32> {
        self.0.first().copied().filter(|&bs| bs > 0)
    }

    pub fn seconds(&self) -> f64 {
        self.1
    }
}

/// precision level (as a string, JSON-friendly) -> measurement
pub type PrecisionRecords = BTreeMap<String, BlockTiming>;
/// dtype name -> precision records
pub type DtypeRecords = BTreeMap<String, PrecisionRecords>;
/// kernel name -> dtype records
pub type KernelRecords = BTreeMap<String, DtypeRecords>;

/// Description, capacity limits and calibration state of one device.
///
/// `desc` is the stable cache key. `rating` is relative to the fastest
/// known device per dtype; a missing entry means "not measured", never
/// zero. `device_info` is replaced wholesale on retest.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub desc: String,
    /// Total device memory in bytes.
    pub memsize: u64,
    /// Required buffer alignment in bytes.
    pub memalign: u32,
    /// Native API version string.
    pub version: String,
    pub device_class: DeviceClass,
    /// Maximum concurrent work-group size.
    pub max_work_group_size: u32,
    /// Per-dimension work-item limits.
    pub max_work_item_sizes: Vec<u32>,
    /// Fast (local/shared) memory available to one work group, in bytes.
    pub local_memsize: u64,
    pub rating: BTreeMap<Dtype, f64>,
    pub device_info: KernelRecords,
}

impl DeviceInfo {
    /// Whether the device favors vectorized execution, which constrains
    /// block sizes to multiples of 4.
    pub fn vector_opt(&self) -> bool {
        self.device_class.is_cpu()
    }

    /// Largest block size the device geometry admits for `dtype`.
    ///
    /// Starts from the square root of the work-group limit, clamps to the
    /// first two per-dimension work-item limits, rounds down to a multiple
    /// of 4 when vectorization applies, then shrinks until two tiles of
    /// `block_size x block_size` elements fit the fast-memory budget.
    pub fn max_block_size(&self, dtype: Dtype) -> u32 {
        let mut bs = (self.max_work_group_size as f64).sqrt() as u32;
        for &limit in self.max_work_item_sizes.iter().take(2) {
            bs = bs.min(limit);
        }
        if self.vector_opt() {
            bs &= !3;
        }
        while bs > 1 && 2 * u64::from(bs) * u64::from(bs) * dtype.elem_bytes() > self.local_memsize
        {
            bs -= 1;
        }
        bs
    }

    /// Calibrated block size for `(kernel, dtype, precision)`.
    ///
    /// On a miss, degrades through the generic matrix-multiplication
    /// kernel, then decreasing precision levels down to 0, and finally
    /// [`DEFAULT_BLOCK_SIZE`], warning at each step. Always returns a
    /// positive value.
    pub fn get_block_size(&self, kernel: &str, dtype: Dtype, precision: u8) -> u32 {
        let mut kernel_name = kernel;
        let mut kernel_records = self.device_info.get(kernel_name);
        if kernel_records.is_none() && kernel_name != GEMM_KERNEL {
            log::warn!(
                "kernel \"{kernel_name}\" has no calibration on {}, \
                 rolling back to {GEMM_KERNEL}",
                self.desc
            );
            kernel_name = GEMM_KERNEL;
            kernel_records = self.device_info.get(kernel_name);
        }
        let Some(kernel_records) = kernel_records else {
            log::warn!(
                "kernel \"{kernel_name}\" has no calibration on {}, \
                 using block size {DEFAULT_BLOCK_SIZE}",
                self.desc
            );
            return DEFAULT_BLOCK_SIZE;
        };
        let Some(dtype_records) = kernel_records.get(dtype.as_str()) else {
            log::warn!(
                "dtype {dtype} has no calibration for kernel \"{kernel_name}\" on {}, \
                 using block size {DEFAULT_BLOCK_SIZE}",
                self.desc
            );
            return DEFAULT_BLOCK_SIZE;
        };
        let mut level = precision;
        loop {
            if let Some(bs) = dtype_records
                .get(&level.to_string())
                .and_then(BlockTiming::block_size)
            {
                return bs;
            }
            if level == 0 {
                break;
            }
            level -= 1;
            log::warn!(
                "precision level {} has no calibration for kernel \"{kernel_name}\" \
                 dtype {dtype} on {}, degrading to level {level}",
                level + 1,
                self.desc
            );
        }
        log::warn!(
            "precision level 0 has no calibration for kernel \"{kernel_name}\" \
             dtype {dtype} on {}, using block size {DEFAULT_BLOCK_SIZE}",
            self.desc
        );
        DEFAULT_BLOCK_SIZE
    }
}
