//! JSON file store for snapshots, history and uptime statistics.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The files kept in the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFile {
    /// Latest cycle results, overwritten every cycle
    Snapshot,
    /// Per-device latency history
    History,
    /// Per-device uptime statistics
    Uptime,
    /// Monitored devices, maintained by the dashboard
    Devices,
}

impl DataFile {
    pub fn file_name(self) -> &'static str {
        match self {
            DataFile::Snapshot => "ping_data.json",
            DataFile::History => "ping_history.json",
            DataFile::Uptime => "uptime_stats.json",
            DataFile::Devices => "devices.json",
        }
    }

    /// History is large and rewritten often, so it is stored compact.
    fn pretty(self) -> bool {
        !matches!(self, DataFile::History)
    }
}

/// File store rooted at the data directory.
///
/// One lock serializes every read and write, across all files.
pub struct Store {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl Store {
    /// Open the store, creating the data directory if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self, file: DataFile) -> PathBuf {
        self.dir.join(file.file_name())
    }

    /// Serialize `data` to `file`, replacing its contents.
    ///
    /// The write is not atomic: a crash mid-write can leave a truncated file.
    pub fn save<T: Serialize + ?Sized>(&self, file: DataFile, data: &T) -> Result<(), StoreError> {
        let path = self.path(file);
        let bytes = if file.pretty() {
            serde_json::to_vec_pretty(data)
        } else {
            serde_json::to_vec(data)
        }
        .map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        fs::write(&path, bytes).map_err(|source| StoreError::Io { path, source })
    }

    /// Read `file`, returning `default` if it is missing or unreadable.
    pub fn load<T: DeserializeOwned>(&self, file: DataFile, default: T) -> T {
        match self.try_load(file) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                tracing::warn!("Store: {}, using defaults", e);
                default
            }
        }
    }

    /// Read a file holding one JSON object keyed by device name.
    ///
    /// Entries that do not deserialize are skipped with a warning, so one bad
    /// record does not cost the others.
    pub fn load_entries<T: DeserializeOwned>(&self, file: DataFile) -> BTreeMap<String, T> {
        let raw: BTreeMap<String, Value> = self.load(file, BTreeMap::new());
        raw.into_iter()
            .filter_map(|(name, value)| match serde_json::from_value(value) {
                Ok(entry) => Some((name, entry)),
                Err(e) => {
                    tracing::warn!(
                        "Store: skipping entry {} in {}: {}",
                        name,
                        file.file_name(),
                        e
                    );
                    None
                }
            })
            .collect()
    }

    fn try_load<T: DeserializeOwned>(&self, file: DataFile) -> Result<Option<T>, StoreError> {
        let path = self.path(file);
        let bytes = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(source) => return Err(StoreError::Io { path, source }),
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Json { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("data");
        let store = Store::open(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(store.path(DataFile::Uptime), dir.join("uptime_stats.json"));
    }

    #[test]
    fn test_open_fails_when_path_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("occupied");
        fs::write(&file, b"x").unwrap();
        assert!(Store::open(&file).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();

        let mut data = BTreeMap::new();
        data.insert("router".to_string(), vec![1, 2, 3]);
        store.save(DataFile::History, &data).unwrap();

        let loaded: BTreeMap<String, Vec<i32>> = store.load(DataFile::History, BTreeMap::new());
        assert_eq!(loaded, data);

        // History is written compact, the others pretty-printed
        let raw = fs::read_to_string(store.path(DataFile::History)).unwrap();
        assert!(!raw.contains('\n'));
        store.save(DataFile::Uptime, &data).unwrap();
        let raw = fs::read_to_string(store.path(DataFile::Uptime)).unwrap();
        assert!(raw.contains('\n'));
    }

    #[test]
    fn test_load_missing_returns_default() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        let loaded: Vec<u32> = store.load(DataFile::Snapshot, vec![7]);
        assert_eq!(loaded, vec![7]);
    }

    #[test]
    fn test_load_malformed_returns_default() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        fs::write(store.path(DataFile::Uptime), b"{\"truncated\": [1, 2").unwrap();

        let loaded: BTreeMap<String, Vec<u32>> = store.load(DataFile::Uptime, BTreeMap::new());
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_entries_skips_bad_records() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        fs::write(
            store.path(DataFile::History),
            br#"{"router": [1, 2], "nas": "oops", "printer": []}"#,
        )
        .unwrap();

        let loaded: BTreeMap<String, Vec<u32>> = store.load_entries(DataFile::History);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["router"], vec![1, 2]);
        assert!(loaded["printer"].is_empty());
        assert!(!loaded.contains_key("nas"));
    }

    #[test]
    fn test_load_entries_on_malformed_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        fs::write(store.path(DataFile::Uptime), b"[1, 2, 3]").unwrap();

        let loaded: BTreeMap<String, Vec<u32>> = store.load_entries(DataFile::Uptime);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_save_into_removed_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("data");
        let store = Store::open(&dir).unwrap();
        fs::remove_dir_all(&dir).unwrap();

        let result = store.save(DataFile::Snapshot, &vec![1]);
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }
}
