//! Engine configuration.
//!
//! An [`EngineConfig`] is built once at startup and passed by reference into
//! the registry and the autotuning engine; the core never mutates it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Backend selector value requesting priority-based auto-selection.
pub const AUTO_BACKEND: &str = "auto";

/// Immutable configuration consumed by the selection and tuning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend to use: [`AUTO_BACKEND`] or an explicit backend id.
    pub backend: String,
    /// Device locator. The grammar is backend-specific:
    /// `"<platform>:<device>[,<device>...]"` for the wgpu variant, a bare
    /// ordinal for the CUDA variant, empty to let the driver pick.
    pub device: String,
    /// Directories holding calibration records, merged on read in listed
    /// order (later entries override earlier ones).
    pub device_dirs: Vec<PathBuf>,
    /// Run the block-size benchmark for devices absent from the cache.
    pub test_unknown_device: bool,
    /// Re-run the benchmark even for devices already in the cache.
    pub test_known_device: bool,
    /// Default summation precision level (0, 1 or 2) for block-size lookups.
    pub precision_level: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            backend: AUTO_BACKEND.to_string(),
            device: String::new(),
            device_dirs: default_device_dirs(),
            test_unknown_device: true,
            test_known_device: false,
            precision_level: 0,
        }
    }
}

/// Default calibration directory: `$XDG_CACHE_HOME/acceltune` or
/// `~/.cache/acceltune`, falling back to the working directory.
pub fn default_device_dirs() -> Vec<PathBuf> {
    let base = if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".cache")
    } else {
        return vec![PathBuf::from(".")];
    };
    vec![base.join("acceltune")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.backend, AUTO_BACKEND);
        assert!(config.device.is_empty());
        assert!(!config.device_dirs.is_empty());
        assert!(config.test_unknown_device);
        assert!(!config.test_known_device);
        assert_eq!(config.precision_level, 0);
    }

    #[test]
    fn partial_deserialization_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"backend": "cpu", "test_known_device": true}"#).unwrap();
        assert_eq!(config.backend, "cpu");
        assert!(config.test_known_device);
        assert!(config.test_unknown_device);
        assert_eq!(config.precision_level, 0);
    }
}
