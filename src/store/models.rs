//! Persisted model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::probe::ProbeResult;

/// One latency sample in a device's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub latency: Option<f64>,
    pub packet_loss: f64,
    pub jitter: Option<f64>,
}

impl HistoryPoint {
    pub fn from_result(timestamp: DateTime<Utc>, result: &ProbeResult) -> Self {
        Self {
            timestamp,
            latency: result.latency,
            packet_loss: result.packet_loss,
            jitter: result.jitter,
        }
    }
}

/// Latest probe result for one device, as written to the snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(flatten)]
    pub result: ProbeResult,
    pub ip: String,
}

/// Results of one probing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub devices: BTreeMap<String, DeviceSnapshot>,
}

impl Snapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            devices: BTreeMap::new(),
        }
    }
}

/// Reachability state of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    #[default]
    Unknown,
    Online,
    Offline,
}

/// Check counters for one calendar period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Period the counters belong to, e.g. "2024-03-05", "2024-W10", "2024-03"
    #[serde(alias = "date", default)]
    pub key: String,
    #[serde(default)]
    pub checks: u64,
    #[serde(default)]
    pub online: u64,
    #[serde(default = "full_pct")]
    pub pct: f64,
}

fn full_pct() -> f64 {
    100.0
}

impl Default for Window {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl Window {
    /// Empty counters for the given period.
    pub fn new(key: String) -> Self {
        Self {
            key,
            checks: 0,
            online: 0,
            pct: 100.0,
        }
    }
}

/// An offline interval. `end` and `duration_sec` stay empty while it is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DowntimeEvent {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub start: DateTime<Utc>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_sec: Option<i64>,
}

impl DowntimeEvent {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// Rolling availability statistics for one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UptimeRecord {
    /// The day window is keyed by `date` on disk
    #[serde(with = "day_window")]
    pub today: Window,
    pub week: Window,
    pub month: Window,
    pub current_state: DeviceState,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub last_change: DateTime<Utc>,
    pub downtime_events: Vec<DowntimeEvent>,
}

mod day_window {
    use super::Window;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    struct DayWindow<'a> {
        date: &'a str,
        checks: u64,
        online: u64,
        pct: f64,
    }

    pub fn serialize<S: Serializer>(window: &Window, serializer: S) -> Result<S::Ok, S::Error> {
        DayWindow {
            date: &window.key,
            checks: window.checks,
            online: window.online,
            pct: window.pct,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Window, D::Error> {
        Window::deserialize(deserializer)
    }
}

/// Timestamps are written as RFC 3339. Files from older monitors carry naive
/// ISO 8601 local times without an offset; those are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", s)))
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", s))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_uptime_record_wire_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        let record = UptimeRecord {
            today: Window::new("2024-03-05".to_string()),
            week: Window::new("2024-W10".to_string()),
            month: Window::new("2024-03".to_string()),
            current_state: DeviceState::Offline,
            last_change: at,
            downtime_events: vec![DowntimeEvent {
                start: at,
                end: None,
                duration_sec: None,
            }],
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["today"]["date"], "2024-03-05");
        assert!(json["today"].get("key").is_none());
        assert_eq!(json["week"]["key"], "2024-W10");
        assert_eq!(json["month"]["pct"], 100.0);
        assert_eq!(json["current_state"], "offline");
        assert!(json["downtime_events"][0]["end"].is_null());
        assert!(json["downtime_events"][0]["duration_sec"].is_null());

        let back: UptimeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_uptime_record_tolerates_missing_fields() {
        let record: UptimeRecord =
            serde_json::from_str(r#"{"today": {"date": "2024-03-05", "checks": 4}}"#).unwrap();
        assert_eq!(record.today.key, "2024-03-05");
        assert_eq!(record.today.checks, 4);
        assert_eq!(record.today.pct, 100.0);
        assert_eq!(record.week, Window::default());
        assert_eq!(record.current_state, DeviceState::Unknown);
        assert!(record.downtime_events.is_empty());
    }

    #[test]
    fn test_reads_naive_timestamps() {
        let raw = r#"{
  "router": {
    "today": {"date": "2024-03-05", "checks": 3, "online": 2, "pct": 66.67},
    "week": {"key": "2024-W09", "checks": 3, "online": 2, "pct": 66.67},
    "month": {"key": "2024-03", "checks": 3, "online": 2, "pct": 66.67},
    "current_state": "online",
    "last_change": "2024-03-05T10:00:30.123456",
    "downtime_events": [
      {"start": "2024-03-05T10:00:00.500000", "end": "2024-03-05T10:00:30.123456",
       "duration_sec": 29},
      {"start": "2024-03-05T11:00:00", "end": null, "duration_sec": null}
    ]
  }
}"#;
        let records: BTreeMap<String, UptimeRecord> = serde_json::from_str(raw).unwrap();
        let router = &records["router"];
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 30).unwrap();
        assert_eq!(router.last_change, at + chrono::Duration::microseconds(123_456));
        assert_eq!(router.today.checks, 3);
        assert_eq!(router.week.key, "2024-W09");
        assert_eq!(router.downtime_events[0].duration_sec, Some(29));
        assert_eq!(router.downtime_events[0].end, Some(router.last_change));
        assert_eq!(
            router.downtime_events[1].start,
            Utc.with_ymd_and_hms(2024, 3, 5, 11, 0, 0).unwrap()
        );
        assert!(router.downtime_events[1].is_open());

        let history: BTreeMap<String, Vec<HistoryPoint>> = serde_json::from_str(
            r#"{"router": [{"timestamp": "2024-03-05T10:00:00.123456", "latency": 1.5,
                "packet_loss": 0.0, "jitter": 0.2}]}"#,
        )
        .unwrap();
        assert_eq!(history["router"][0].latency, Some(1.5));
    }

    #[test]
    fn test_rejects_unparsable_timestamp() {
        let err = serde_json::from_str::<DowntimeEvent>(r#"{"start": "yesterday"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn test_snapshot_flattens_result() {
        let mut snapshot = Snapshot::new(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap());
        snapshot.devices.insert(
            "router".to_string(),
            DeviceSnapshot {
                result: ProbeResult::unreachable(5),
                ip: "192.168.1.1".to_string(),
            },
        );

        let json = serde_json::to_value(&snapshot).unwrap();
        let router = &json["devices"]["router"];
        assert_eq!(router["reachable"], false);
        assert!(router["latency"].is_null());
        assert_eq!(router["packet_loss"], 100.0);
        assert_eq!(router["packets_sent"], 5);
        assert_eq!(router["ip"], "192.168.1.1");
    }
}
