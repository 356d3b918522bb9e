//! Portable GPU variant on top of wgpu.
//!
//! Adapters are grouped by native API family (`wgpu::Backend`), which plays
//! the role of a platform in the `"<platform>:<device>[,<device>...]"`
//! locator grammar. An empty locator picks the best adapter available
//! (discrete over integrated over the rest). wgpu handles are free-threaded,
//! so no per-thread binding hooks are needed.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::device::{Device, DeviceError, DeviceNotFoundError, PoolBindings};
use crate::device_info::DeviceInfo;
use crate::registry::BackendEntry;
use crate::types::DeviceClass;

pub const BACKEND_ID: &str = "wgpu";
pub const PRIORITY: i32 = 20;

pub fn backend_entry() -> BackendEntry {
    BackendEntry {
        id: BACKEND_ID,
        priority: PRIORITY,
        probe,
        acquire: |config| WgpuDevice::acquire(config).map(|d| Box::new(d) as Box<dyn Device>),
    }
}

fn probe() -> bool {
    let instance = wgpu::Instance::default();
    !instance
        .enumerate_adapters(wgpu::Backends::all())
        .is_empty()
}

pub struct WgpuDevice {
    info: DeviceInfo,
    device: wgpu::Device,
    #[allow(dead_code)]
    queue: wgpu::Queue,
    pid: u32,
    bindings: Arc<PoolBindings>,
}

impl WgpuDevice {
    pub fn acquire(config: &EngineConfig) -> Result<WgpuDevice, DeviceNotFoundError> {
        let instance = wgpu::Instance::default();
        let adapters = instance.enumerate_adapters(wgpu::Backends::all());
        if adapters.is_empty() {
            return Err(DeviceNotFoundError::new("no wgpu adapters were found"));
        }
        let adapter = select_adapter(adapters, &config.device)?;
        let adapter_info = adapter.get_info();
        let limits = adapter.limits();

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("acceltune"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| {
            DeviceNotFoundError::new(format!(
                "adapter \"{}\" rejected device creation: {e}",
                adapter_info.name
            ))
        })?;

        let version = if adapter_info.driver.is_empty() {
            adapter_info.backend.to_str().to_string()
        } else {
            format!("{} {}", adapter_info.driver, adapter_info.driver_info)
        };
        let info = DeviceInfo {
            desc: format!(
                "{}/{}/{}",
                adapter_info.backend.to_str(),
                adapter_info.name.trim(),
                adapter_info.vendor
            ),
            memsize: limits.max_buffer_size,
            memalign: limits.min_storage_buffer_offset_alignment,
            version,
            device_class: device_class(adapter_info.device_type),
            max_work_group_size: limits.max_compute_invocations_per_workgroup,
            max_work_item_sizes: vec![
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            local_memsize: u64::from(limits.max_compute_workgroup_storage_size),
            rating: Default::default(),
            device_info: Default::default(),
        };
        Ok(WgpuDevice {
            info,
            device,
            queue,
            pid: std::process::id(),
            bindings: PoolBindings::new(),
        })
    }
}

impl Device for WgpuDevice {
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
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| DeviceError::Wgpu(e.to_string()))
    }

    fn bindings(&self) -> &Arc<PoolBindings> {
        &self.bindings
    }
}

fn device_class(device_type: wgpu::DeviceType) -> DeviceClass {
    match device_type {
        wgpu::DeviceType::Cpu => DeviceClass::Cpu,
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu => DeviceClass::Gpu,
        wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => DeviceClass::Hybrid,
    }
}

fn adapter_rank(device_type: wgpu::DeviceType) -> u8 {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => 0,
        wgpu::DeviceType::IntegratedGpu => 1,
        wgpu::DeviceType::VirtualGpu => 2,
        wgpu::DeviceType::Cpu => 3,
        wgpu::DeviceType::Other => 4,
    }
}

/// Pick the adapter named by the locator, or the best one for an empty
/// locator. The platform index addresses the distinct API families in
/// enumeration order; device indices address adapters within the family.
fn select_adapter(
    adapters: Vec<wgpu::Adapter>,
    locator: &str,
) -> Result<wgpu::Adapter, DeviceNotFoundError> {
    if locator.is_empty() {
        let mut adapters = adapters;
        adapters.sort_by_key(|a| adapter_rank(a.get_info().device_type));
        return Ok(adapters.into_iter().next().expect("non-empty adapter list"));
    }

    let (platform_part, device_part) = locator.split_once(':').ok_or_else(|| {
        DeviceNotFoundError::new(format!(
            "device locator \"{locator}\" does not match <platform>:<device>[,<device>...]"
        ))
    })?;
    let platform_index: usize = platform_part.trim().parse().map_err(|_| {
        DeviceNotFoundError::new(format!("invalid platform index in \"{locator}\""))
    })?;

    // Group adapters by API family, preserving enumeration order.
    let mut platforms: Vec<(wgpu::Backend, Vec<wgpu::Adapter>)> = Vec::new();
    for adapter in adapters {
        let backend = adapter.get_info().backend;
        match platforms.iter_mut().find(|(b, _)| *b == backend) {
            Some((_, group)) => group.push(adapter),
            None => platforms.push((backend, vec![adapter])),
        }
    }
    if platform_index >= platforms.len() {
        return Err(DeviceNotFoundError::new(format!(
            "platform {platform_index} was not found ({} available)",
            platforms.len()
        )));
    }
    let (backend, group) = platforms.swap_remove(platform_index);

    let mut indices = Vec::new();
    for part in device_part.split(',') {
        let index: usize = part.trim().parse().map_err(|_| {
            DeviceNotFoundError::new(format!("invalid device index \"{part}\" in \"{locator}\""))
        })?;
        if index >= group.len() {
            return Err(DeviceNotFoundError::new(format!(
                "device {index} was not found on platform {platform_index} ({}, {} devices)",
                backend.to_str(),
                group.len()
            )));
        }
        indices.push(index);
    }
    if indices.len() > 1 {
        log::debug!(
            "locator \"{locator}\" names {} devices; submissions target the first",
            indices.len()
        );
    }
    let first = indices[0];
    Ok(group.into_iter().nth(first).expect("index checked above"))
}
