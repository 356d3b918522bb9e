//! Persistent calibration records.
//!
//! Records are merged from every configured directory in listed order, with
//! later directories overriding earlier ones for the same device key. The
//! merged-and-updated set is written back to the first directory that
//! accepts the write; concurrent writers to the same directory race with
//! last-writer-wins semantics, which is accepted.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::device_info::KernelRecords;

/// File name of the calibration records in each directory.
pub const RECORDS_FILE: &str = "device_records.json";

/// device description -> kernel records
pub type DeviceRecords = BTreeMap<String, KernelRecords>;

/// Reads and writes calibration records across an ordered directory list.
pub struct CalibrationStore {
    dirs: Vec<PathBuf>,
}

impl CalibrationStore {
    pub fn new(dirs: &[PathBuf]) -> Self {
        CalibrationStore {
            dirs: dirs.to_vec(),
        }
    }

    /// Merge records from every directory. Missing directories are created
    /// best-effort; unreadable or corrupt files degrade to a warning.
    pub fn load_merged(&self) -> DeviceRecords {
        let mut merged = DeviceRecords::new();
        let mut found_any = false;
        for dir in &self.dirs {
            if !dir.exists() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    log::debug!("could not create {}: {e}", dir.display());
                }
            }
            let path = dir.join(RECORDS_FILE);
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(_) => continue,
            };
            match serde_json::from_str::<DeviceRecords>(&content) {
                Ok(records) => {
                    merged.extend(records);
                    found_any = true;
                }
                Err(e) => {
                    log::warn!("failed to parse {}: {e}", path.display());
                }
            }
        }
        if !found_any {
            log::warn!(
                "did not find {RECORDS_FILE} in any of the configured paths: {:?}",
                self.dirs
            );
        }
        merged
    }

    /// Write the full record set as sorted, human-readable JSON to the
    /// first writable directory. Returns false (after a warning) if no
    /// directory accepted the write; persistence failures are never fatal.
    pub fn save(&self, records: &DeviceRecords) -> bool {
        let content = match serde_json::to_string_pretty(records) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("failed to serialize calibration records: {e}");
                return false;
            }
        };
        for dir in &self.dirs {
            let path = dir.join(RECORDS_FILE);
            match std::fs::write(&path, &content) {
                Ok(()) => {
                    log::info!("saved calibration records to {}", path.display());
                    return true;
                }
                Err(e) => {
                    log::debug!("cannot write {}: {e}", path.display());
                }
            }
        }
        log::warn!(
            "unable to save calibration records to any of the configured paths: {:?}",
            self.dirs
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_info::{BlockTiming, DtypeRecords, PrecisionRecords};

    fn record(bs: u32, seconds: f64) -> KernelRecords {
        let mut precisions = PrecisionRecords::new();
        precisions.insert("0".to_string(), BlockTiming::square(bs, seconds));
        let mut dtypes = DtypeRecords::new();
        dtypes.insert("float".to_string(), precisions);
        let mut kernels = KernelRecords::new();
        kernels.insert("matrix_multiplication".to_string(), dtypes);
        kernels
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(&[dir.path().to_path_buf()]);
        let mut records = DeviceRecords::new();
        records.insert("vendor/device/1".to_string(), record(16, 0.25));
        assert!(store.save(&records));
        let loaded = store.load_merged();
        assert_eq!(loaded, records);
    }

    #[test]
    fn later_directory_overrides_earlier() {
        let low = tempfile::tempdir().unwrap();
        let high = tempfile::tempdir().unwrap();
        let mut base = DeviceRecords::new();
        base.insert("shared/key/0".to_string(), record(8, 1.0));
        base.insert("only/low/0".to_string(), record(12, 2.0));
        CalibrationStore::new(&[low.path().to_path_buf()]).save(&base);

        let mut winner = DeviceRecords::new();
        winner.insert("shared/key/0".to_string(), record(24, 0.5));
        CalibrationStore::new(&[high.path().to_path_buf()]).save(&winner);

        let store =
            CalibrationStore::new(&[low.path().to_path_buf(), high.path().to_path_buf()]);
        let merged = store.load_merged();
        assert_eq!(merged["shared/key/0"], winner["shared/key/0"]);
        assert_eq!(merged["only/low/0"], base["only/low/0"]);
    }

    #[test]
    fn unwritable_directories_degrade_to_false() {
        let missing = PathBuf::from("/proc/acceltune-no-such-dir");
        let store = CalibrationStore::new(&[missing]);
        let mut records = DeviceRecords::new();
        records.insert("vendor/device/1".to_string(), record(16, 0.25));
        assert!(!store.save(&records));
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RECORDS_FILE), "not json").unwrap();
        let store = CalibrationStore::new(&[dir.path().to_path_buf()]);
        assert!(store.load_merged().is_empty());
    }

    #[test]
    fn falls_through_to_writable_directory() {
        let unwritable = PathBuf::from("/proc/acceltune-no-such-dir");
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::new(&[unwritable, dir.path().to_path_buf()]);
        let mut records = DeviceRecords::new();
        records.insert("vendor/device/1".to_string(), record(16, 0.25));
        assert!(store.save(&records));
        assert!(dir.path().join(RECORDS_FILE).exists());
    }
}
