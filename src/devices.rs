//! Device source: the set of monitored devices, re-read every cycle.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::store::{DataFile, Store};

/// Supplies the current device name → address set.
pub trait DeviceSource: Send + Sync {
    fn load_devices(&self) -> BTreeMap<String, String>;
}

/// A device entry in either of the two shapes found in devices files.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeviceRecord {
    /// `"name": "192.168.1.1"`
    Address(String),
    /// `"name": {"ip": "192.168.1.1", "type": "router", ...}`
    Detailed(Map<String, Value>),
}

impl DeviceRecord {
    fn into_address(self) -> String {
        match self {
            DeviceRecord::Address(ip) => ip,
            DeviceRecord::Detailed(fields) => fields
                .get("ip")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Normalize raw devices-file contents to name → address.
///
/// Entries in any other shape are skipped.
pub fn normalize_devices(raw: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter_map(|(name, value)| match DeviceRecord::deserialize(value) {
            Ok(record) => Some((name, record.into_address())),
            Err(_) => {
                tracing::debug!("Devices: skipping {} with unrecognized record", name);
                None
            }
        })
        .collect()
}

/// Parse a `name:addr,name:addr` list. Pairs without a colon are ignored.
pub fn parse_device_list(list: &str) -> BTreeMap<String, String> {
    list.split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(name, addr)| (name.trim().to_string(), addr.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// Reads `devices.json` from the data directory.
pub struct FileDeviceSource {
    store: Arc<Store>,
    defaults: BTreeMap<String, String>,
}

impl FileDeviceSource {
    /// `default_devices` is used while the devices file is missing or empty.
    pub fn new(store: Arc<Store>, default_devices: &str) -> Self {
        Self {
            store,
            defaults: parse_device_list(default_devices),
        }
    }
}

impl DeviceSource for FileDeviceSource {
    fn load_devices(&self) -> BTreeMap<String, String> {
        let raw: BTreeMap<String, Value> = self.store.load(DataFile::Devices, BTreeMap::new());
        if raw.is_empty() {
            return self.defaults.clone();
        }
        normalize_devices(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_both_shapes() {
        let raw: BTreeMap<String, Value> = serde_json::from_str(
            r#"{
                "router": "192.168.1.1",
                "nas": {"ip": "192.168.1.20", "type": "storage", "mac": "aa:bb"},
                "blank": {"type": "printer"},
                "broken": 42,
                "list": ["10.0.0.1"]
            }"#,
        )
        .unwrap();

        let devices = normalize_devices(raw);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices["router"], "192.168.1.1");
        assert_eq!(devices["nas"], "192.168.1.20");
        assert_eq!(devices["blank"], "");
        assert!(!devices.contains_key("broken"));
        assert!(!devices.contains_key("list"));
    }

    #[test]
    fn test_parse_device_list() {
        let devices = parse_device_list(" router : 192.168.1.1,nas:10.0.0.2, junk ,:1.1.1.1");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices["router"], "192.168.1.1");
        assert_eq!(devices["nas"], "10.0.0.2");
    }

    #[test]
    fn test_parse_device_list_keeps_ipv6_after_first_colon() {
        let devices = parse_device_list("gw:fe80::1");
        assert_eq!(devices["gw"], "fe80::1");
    }

    #[test]
    fn test_file_source_reads_devices_file() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(Store::open(tmp.path()).unwrap());
        std::fs::write(
            store.path(DataFile::Devices),
            r#"{"router": "192.168.1.1", "nas": {"ip": "192.168.1.20"}}"#,
        )
        .unwrap();

        let source = FileDeviceSource::new(store, "fallback:10.0.0.1");
        let devices = source.load_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices["nas"], "192.168.1.20");
    }

    #[test]
    fn test_file_source_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(Store::open(tmp.path()).unwrap());

        let source = FileDeviceSource::new(store.clone(), "fallback:10.0.0.1");
        assert_eq!(source.load_devices()["fallback"], "10.0.0.1");

        // Malformed file behaves like a missing one
        std::fs::write(store.path(DataFile::Devices), "not json").unwrap();
        assert_eq!(source.load_devices().len(), 1);

        let empty = FileDeviceSource::new(store, "");
        assert!(empty.load_devices().is_empty());
    }
}
