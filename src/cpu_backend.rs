//! Software fallback device, always available.
//!
//! Executes synchronously on the host; there is no native context to bind,
//! so the worker lifecycle hooks are no-ops. Capacity limits come from the
//! host: total RAM, L1 data cache as the fast-memory budget, and a
//! synthetic work-group geometry sized for the vectorized sweep grid.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::device::{Device, DeviceError, DeviceNotFoundError, PoolBindings};
use crate::device_info::DeviceInfo;
use crate::registry::BackendEntry;
use crate::types::DeviceClass;

pub const BACKEND_ID: &str = "cpu";
pub const PRIORITY: i32 = 10;

const FALLBACK_MEMSIZE: u64 = 4 << 30;
const FALLBACK_L1D: u64 = 32 * 1024;

pub fn backend_entry() -> BackendEntry {
    BackendEntry {
        id: BACKEND_ID,
        priority: PRIORITY,
        probe: || true,
        acquire: |config| CpuDevice::acquire(config).map(|d| Box::new(d) as Box<dyn Device>),
    }
}

pub struct CpuDevice {
    info: DeviceInfo,
    pid: u32,
    bindings: Arc<PoolBindings>,
}

impl CpuDevice {
    pub fn acquire(_config: &EngineConfig) -> Result<CpuDevice, DeviceNotFoundError> {
        let (vendor, model) = cpu_identity();
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let info = DeviceInfo {
            desc: format!("{vendor}/{model}/{cores}"),
            memsize: total_host_memory().unwrap_or(FALLBACK_MEMSIZE),
            memalign: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
            device_class: DeviceClass::Cpu,
            max_work_group_size: 1024,
            max_work_item_sizes: vec![1024, 1024],
            local_memsize: l1d_cache_size().unwrap_or(FALLBACK_L1D),
            rating: Default::default(),
            device_info: Default::default(),
        };
        Ok(CpuDevice {
            info,
            pid: std::process::id(),
            bindings: PoolBindings::new(),
        })
    }
}

impl Device for CpuDevice {
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
        false
    }

    fn sync(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn bindings(&self) -> &Arc<PoolBindings> {
        &self.bindings
    }
}

fn cpu_identity() -> (String, String) {
    #[cfg(target_os = "linux")]
    {
        if let Some(identity) = cpuinfo_identity() {
            return identity;
        }
    }
    ("Unknown".to_string(), "Unknown CPU".to_string())
}

#[cfg(target_os = "linux")]
fn cpuinfo_identity() -> Option<(String, String)> {
    let content = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    let mut vendor = None;
    let mut model = None;
    for line in content.lines() {
        if line.starts_with("vendor_id") {
            vendor = line.split(':').nth(1).map(|s| s.trim().to_string());
        }
        if line.starts_with("model name") {
            model = line.split(':').nth(1).map(|s| s.trim().to_string());
        }
        if vendor.is_some() && model.is_some() {
            break;
        }
    }
    Some((
        vendor.unwrap_or_else(|| "Unknown".to_string()),
        model.unwrap_or_else(|| "Unknown CPU".to_string()),
    ))
}

fn total_host_memory() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/meminfo") {
            for line in content.lines() {
                let Some(rest) = line.strip_prefix("MemTotal:") else {
                    continue;
                };
                let kib = rest.trim().trim_end_matches("kB").trim().parse::<u64>();
                if let Ok(kib) = kib {
                    return Some(kib * 1024);
                }
            }
        }
    }
    None
}

fn l1d_cache_size() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        for idx in 0..8 {
            let base = format!("/sys/devices/system/cpu/cpu0/cache/index{idx}");
            let level = std::fs::read_to_string(format!("{base}/level"));
            let cache_type = std::fs::read_to_string(format!("{base}/type"));
            let (Ok(level), Ok(cache_type)) = (level, cache_type) else {
                continue;
            };
            if level.trim() != "1" || cache_type.trim() != "Data" {
                continue;
            }
            let size = std::fs::read_to_string(format!("{base}/size")).ok()?;
            let kib: u64 = size.trim().trim_end_matches('K').parse().ok()?;
            return Some(kib * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_always_succeeds() {
        let device = CpuDevice::acquire(&EngineConfig::default()).unwrap();
        assert!(device.exists());
        assert!(!device.is_async());
        assert!(device.blas().is_none());
        assert!(device.info.memsize > 0);
        assert!(device.info.local_memsize > 0);
    }

    #[test]
    fn geometry_supports_the_vectorized_sweep() {
        let device = CpuDevice::acquire(&EngineConfig::default()).unwrap();
        assert!(device.info.vector_opt());
        for dtype in crate::types::Dtype::ALL {
            let max = device.info.max_block_size(dtype);
            assert!(max >= 8, "max block size {max} leaves no sweep range");
        }
    }

    #[test]
    fn sync_is_a_no_op() {
        let device = CpuDevice::acquire(&EngineConfig::default()).unwrap();
        device.sync().unwrap();
    }
}
