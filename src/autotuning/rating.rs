//! Cross-device rating normalization.
//!
//! A device's rating for a dtype is `global_min(dtype) / time(device)`,
//! computed over the precision-level-0 matrix-multiplication timings of the
//! whole record set: 1.0 for the fastest known device, in (0, 1] otherwise.
//! Devices without a level-0 timing get no entry — absence, never zero.

use std::collections::BTreeMap;

use crate::autotuning::cache::DeviceRecords;
use crate::device_info::GEMM_KERNEL;
use crate::types::Dtype;

pub type RatingMap = BTreeMap<Dtype, f64>;

/// Ratings for every device in `records`, keyed by device description.
pub fn compute_ratings(records: &DeviceRecords) -> BTreeMap<String, RatingMap> {
    let mut times: BTreeMap<&str, BTreeMap<Dtype, f64>> = BTreeMap::new();
    let mut global_min: BTreeMap<Dtype, f64> = BTreeMap::new();

    for (desc, kernels) in records {
        let Some(dtypes) = kernels.get(GEMM_KERNEL) else {
            continue;
        };
        for (dtype_name, precisions) in dtypes {
            let Ok(dtype) = dtype_name.parse::<Dtype>() else {
                log::debug!("skipping unknown dtype \"{dtype_name}\" for {desc}");
                continue;
            };
            let Some(timing) = precisions.get("0") else {
                continue;
            };
            let seconds = timing.seconds();
            if !seconds.is_finite() || seconds <= 0.0 {
                continue;
            }
            times.entry(desc.as_str()).or_default().insert(dtype, seconds);
            global_min
                .entry(dtype)
                .and_modify(|min| *min = min.min(seconds))
                .or_insert(seconds);
        }
    }

    let mut ratings = BTreeMap::new();
    for (desc, per_dtype) in times {
        let mut rating = RatingMap::new();
        for (dtype, seconds) in per_dtype {
            let score = global_min[&dtype] / seconds;
            log::debug!("rating {desc} {dtype} {score:.3}");
            rating.insert(dtype, score);
        }
        ratings.insert(desc.to_string(), rating);
    }
    ratings
}
