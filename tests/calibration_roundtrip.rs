//! End-to-end: resolve a device, calibrate it, persist, reload, re-rate.

use std::path::PathBuf;

use acceltune::autotuning::CalibrationStore;
use acceltune::device::Device;
use acceltune::{
    acquire_device, BlockTiming, Dtype, EngineConfig, Workload, WorkloadError, WorkloadFactory,
    WorkloadSpec, DEFAULT_BLOCK_SIZE, GEMM_KERNEL,
};

struct Scripted {
    duration: std::time::Duration,
}

impl Workload for Scripted {
    fn run(&mut self) -> Result<(), WorkloadError> {
        std::thread::sleep(self.duration);
        Ok(())
    }
}

/// Deterministic benchmark: fastest at `preferred`, slower with distance.
struct ScriptedFactory {
    preferred: u32,
    created: usize,
}

impl ScriptedFactory {
    fn preferring(preferred: u32) -> Self {
        ScriptedFactory {
            preferred,
            created: 0,
        }
    }
}

impl WorkloadFactory for ScriptedFactory {
    fn create(
        &mut self,
        _device: &dyn Device,
        spec: &WorkloadSpec,
    ) -> Result<Box<dyn Workload>, WorkloadError> {
        self.created += 1;
        let distance = spec.block_size.abs_diff(self.preferred) as u64;
        Ok(Box::new(Scripted {
            duration: std::time::Duration::from_millis(1 + distance),
        }))
    }
}

fn cpu_config(dirs: Vec<PathBuf>) -> EngineConfig {
    EngineConfig {
        backend: "cpu".to_string(),
        device_dirs: dirs,
        ..EngineConfig::default()
    }
}

#[test]
fn calibrate_persist_reload() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let dirs = vec![dir.path().to_path_buf()];

    let mut factory = ScriptedFactory::preferring(12);
    let config = cpu_config(dirs.clone());
    let device = acquire_device(&config, &mut factory).unwrap();
    assert!(factory.created > 0);
    assert!(dir.path().join(acceltune::autotuning::RECORDS_FILE).exists());

    let info = device.device_info();
    let mut lookups = Vec::new();
    for dtype in Dtype::ALL {
        for level in [0u8, 1, 2] {
            let bs = info.get_block_size(GEMM_KERNEL, dtype, level);
            assert_eq!(bs, 12);
            lookups.push((dtype, level, bs));
        }
        // Single calibrated device: it is the fastest known one.
        assert_eq!(info.rating[&dtype], 1.0);
    }
    drop(device);

    // A sibling process trusts the cache and skips the benchmark.
    let mut factory = ScriptedFactory::preferring(28);
    let config = EngineConfig {
        test_unknown_device: false,
        ..cpu_config(dirs)
    };
    let device = acquire_device(&config, &mut factory).unwrap();
    assert_eq!(factory.created, 0);
    let info = device.device_info();
    for (dtype, level, bs) in lookups {
        assert_eq!(info.get_block_size(GEMM_KERNEL, dtype, level), bs);
    }
}

#[test]
fn merge_precedence_prefers_later_directory() {
    let _ = env_logger::builder().is_test(true).try_init();
    // Discover this machine's device key without touching any cache.
    let probe_dir = tempfile::tempdir().unwrap();
    let mut factory = ScriptedFactory::preferring(12);
    let config = EngineConfig {
        test_unknown_device: false,
        ..cpu_config(vec![probe_dir.path().to_path_buf()])
    };
    let desc = acquire_device(&config, &mut factory)
        .unwrap()
        .device_info()
        .desc
        .clone();

    let earlier = tempfile::tempdir().unwrap();
    let later = tempfile::tempdir().unwrap();
    for (dir, block_size) in [(&earlier, 8u32), (&later, 24u32)] {
        let mut records = acceltune::DeviceRecords::new();
        let mut precisions = std::collections::BTreeMap::new();
        precisions.insert("0".to_string(), BlockTiming::square(block_size, 0.5));
        let mut dtypes = std::collections::BTreeMap::new();
        dtypes.insert("float".to_string(), precisions);
        let mut kernels = acceltune::KernelRecords::new();
        kernels.insert(GEMM_KERNEL.to_string(), dtypes);
        records.insert(desc.clone(), kernels);
        assert!(CalibrationStore::new(&[dir.path().to_path_buf()]).save(&records));
    }

    let mut factory = ScriptedFactory::preferring(12);
    let config = EngineConfig {
        test_unknown_device: false,
        ..cpu_config(vec![
            earlier.path().to_path_buf(),
            later.path().to_path_buf(),
        ])
    };
    let device = acquire_device(&config, &mut factory).unwrap();
    assert_eq!(factory.created, 0);
    assert_eq!(
        device
            .device_info()
            .get_block_size(GEMM_KERNEL, Dtype::Float, 0),
        24
    );
}

#[test]
fn unknown_lookups_always_return_positive_defaults() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let mut factory = ScriptedFactory::preferring(12);
    let config = EngineConfig {
        test_unknown_device: false,
        ..cpu_config(vec![dir.path().to_path_buf()])
    };
    let device = acquire_device(&config, &mut factory).unwrap();
    let info = device.device_info();
    // Nothing calibrated, arbitrary kernel and precision: the degradation
    // chain still produces a positive block size.
    for dtype in Dtype::ALL {
        for level in [0u8, 1, 2, 7] {
            let bs = info.get_block_size("conv", dtype, level);
            assert_eq!(bs, DEFAULT_BLOCK_SIZE);
        }
    }
}

#[test]
fn forced_retest_refreshes_records() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let dirs = vec![dir.path().to_path_buf()];

    let mut factory = ScriptedFactory::preferring(12);
    let device = acquire_device(&cpu_config(dirs.clone()), &mut factory).unwrap();
    assert_eq!(
        device
            .device_info()
            .get_block_size(GEMM_KERNEL, Dtype::Float, 0),
        12
    );
    drop(device);

    // The benchmark now prefers a different block size; a forced retest
    // must replace the stored records wholesale.
    let mut factory = ScriptedFactory::preferring(20);
    let config = EngineConfig {
        test_known_device: true,
        ..cpu_config(dirs)
    };
    let device = acquire_device(&config, &mut factory).unwrap();
    assert!(factory.created > 0);
    assert_eq!(
        device
            .device_info()
            .get_block_size(GEMM_KERNEL, Dtype::Float, 0),
        20
    );
}
