//! Backend registry and priority-based auto-selection.
//!
//! Backends form a closed set described by a table of [`BackendEntry`]
//! values built once at startup. Auto-selection walks the table by priority
//! and acquires the first variant whose cheap availability probe succeeds;
//! the CPU variant always probes true, so resolution never fails.

use std::cmp::Reverse;

use thiserror::Error;

use crate::config::{EngineConfig, AUTO_BACKEND};
use crate::device::{Device, DeviceNotFoundError};

/// Availability probe: native API enumeration only, no context allocation.
pub type ProbeFn = fn() -> bool;
/// Variant constructor: acquires a native handle and builds its DeviceInfo.
pub type AcquireFn = fn(&EngineConfig) -> Result<Box<dyn Device>, DeviceNotFoundError>;

/// One registered backend variant.
pub struct BackendEntry {
    pub id: &'static str,
    pub priority: i32,
    pub probe: ProbeFn,
    pub acquire: AcquireFn,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("backend \"{0}\" is already registered")]
    DuplicateBackend(String),
}

/// Registry of backend variants, ordered by registration.
pub struct BackendRegistry {
    entries: Vec<BackendEntry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        BackendRegistry {
            entries: Vec::new(),
        }
    }

    /// Registry holding every variant compiled into this build: CUDA
    /// (priority 30), wgpu (priority 20) and the CPU fallback (priority 10).
    pub fn with_default_backends() -> Self {
        let mut registry = BackendRegistry::new();
        #[cfg(feature = "cuda")]
        registry
            .register(crate::cuda_backend::backend_entry())
            .expect("default registry built once");
        #[cfg(feature = "wgpu")]
        registry
            .register(crate::wgpu_backend::backend_entry())
            .expect("default registry built once");
        registry
            .register(crate::cpu_backend::backend_entry())
            .expect("default registry built once");
        registry
    }

    /// Add a variant. Fails if the identifier is already taken.
    pub fn register(&mut self, entry: BackendEntry) -> Result<(), RegistryError> {
        if self.entries.iter().any(|e| e.id == entry.id) {
            return Err(RegistryError::DuplicateBackend(entry.id.to_string()));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&BackendEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Registered identifiers with their priorities, for error messages.
    pub fn backends_as_str(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("\"{}\" (priority {})", e.id, e.priority))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Resolve `config.backend` to a concrete device.
    ///
    /// `"auto"` walks the variants by priority descending (registration
    /// order breaks ties) and returns the first that probes available and
    /// acquires successfully. An explicit identifier acquires that variant
    /// directly.
    pub fn resolve(&self, config: &EngineConfig) -> Result<Box<dyn Device>, DeviceNotFoundError> {
        if config.backend == AUTO_BACKEND {
            return self.resolve_auto(config);
        }
        let entry = self.get(&config.backend).ok_or_else(|| {
            DeviceNotFoundError::new(format!(
                "unknown backend \"{}\"; registered backends: {}",
                config.backend,
                self.backends_as_str()
            ))
        })?;
        (entry.acquire)(config)
    }

    fn resolve_auto(&self, config: &EngineConfig) -> Result<Box<dyn Device>, DeviceNotFoundError> {
        let mut order: Vec<&BackendEntry> = self.entries.iter().collect();
        order.sort_by_key(|e| Reverse(e.priority));
        for entry in order {
            if !(entry.probe)() {
                log::debug!("backend \"{}\" is not available", entry.id);
                continue;
            }
            match (entry.acquire)(config) {
                Ok(device) => {
                    log::info!("auto-selected backend \"{}\"", entry.id);
                    return Ok(device);
                }
                Err(e) => {
                    log::warn!("backend \"{}\" probed available but failed: {e}", entry.id);
                }
            }
        }
        Err(DeviceNotFoundError::new(format!(
            "no backend could be acquired; registered backends: {}",
            self.backends_as_str()
        )))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_default_backends()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_backend;

    fn probe_false() -> bool {
        false
    }

    fn acquire_fails(_: &EngineConfig) -> Result<Box<dyn Device>, DeviceNotFoundError> {
        Err(DeviceNotFoundError::new("no such device"))
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register(cpu_backend::backend_entry()).unwrap();
        let err = registry.register(cpu_backend::backend_entry()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateBackend(id) if id == "cpu"));
    }

    #[test]
    fn auto_with_cpu_never_fails() {
        let registry = BackendRegistry::with_default_backends();
        let config = EngineConfig::default();
        let device = registry.resolve(&config).unwrap();
        assert!(device.exists());
    }

    #[test]
    fn auto_skips_unavailable_and_failing_backends() {
        let mut registry = BackendRegistry::new();
        registry.register(cpu_backend::backend_entry()).unwrap();
        registry
            .register(BackendEntry {
                id: "absent",
                priority: 90,
                probe: probe_false,
                acquire: acquire_fails,
            })
            .unwrap();
        registry
            .register(BackendEntry {
                id: "flaky",
                priority: 80,
                probe: || true,
                acquire: acquire_fails,
            })
            .unwrap();
        let config = EngineConfig::default();
        let device = registry.resolve(&config).unwrap();
        assert_eq!(device.backend_id(), "cpu");
    }

    #[test]
    fn explicit_unknown_backend_errors() {
        let registry = BackendRegistry::with_default_backends();
        let config = EngineConfig {
            backend: "tpu".to_string(),
            ..EngineConfig::default()
        };
        let err = registry.resolve(&config).err().unwrap();
        assert!(err.to_string().contains("unknown backend"));
    }

    #[test]
    fn explicit_cpu_resolves() {
        let registry = BackendRegistry::with_default_backends();
        let config = EngineConfig {
            backend: "cpu".to_string(),
            ..EngineConfig::default()
        };
        let device = registry.resolve(&config).unwrap();
        assert_eq!(device.backend_id(), "cpu");
        assert!(!device.is_async());
    }
}
