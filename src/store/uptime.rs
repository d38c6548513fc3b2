//! Rolling uptime statistics and downtime tracking.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::models::{DeviceState, DowntimeEvent, UptimeRecord, Window};

/// Maximum downtime events kept per device.
pub const MAX_DOWNTIME_EVENTS: usize = 50;

/// Period keys for the day, ISO week and month containing `now`.
pub fn period_keys(now: DateTime<Utc>) -> (String, String, String) {
    (
        now.format("%Y-%m-%d").to_string(),
        now.format("%G-W%V").to_string(),
        now.format("%Y-%m").to_string(),
    )
}

/// Per-device uptime records.
#[derive(Debug, Clone, Default)]
pub struct UptimeTracker {
    records: BTreeMap<String, UptimeRecord>,
}

impl UptimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: BTreeMap<String, UptimeRecord>) -> Self {
        Self { records }
    }

    /// Record one check of `device` taken at `now`.
    pub fn update(&mut self, device: &str, reachable: bool, now: DateTime<Utc>) {
        let (day, week, month) = period_keys(now);

        let record = self
            .records
            .entry(device.to_string())
            .or_insert_with(|| UptimeRecord {
                today: Window::new(day.clone()),
                week: Window::new(week.clone()),
                month: Window::new(month.clone()),
                current_state: DeviceState::Unknown,
                last_change: now,
                downtime_events: Vec::new(),
            });

        for (window, key) in [
            (&mut record.today, day),
            (&mut record.week, week),
            (&mut record.month, month),
        ] {
            if window.key != key {
                *window = Window::new(key);
            }
            window.checks += 1;
            if reachable {
                window.online += 1;
            }
            window.pct = pct(window.online, window.checks);
        }

        let new_state = if reachable {
            DeviceState::Online
        } else {
            DeviceState::Offline
        };

        if record.current_state != DeviceState::Unknown && record.current_state != new_state {
            record.last_change = now;
            match new_state {
                DeviceState::Offline => {
                    tracing::info!("Uptime: {} went offline", device);
                    record.downtime_events.push(DowntimeEvent {
                        start: now,
                        end: None,
                        duration_sec: None,
                    });
                }
                _ => {
                    if let Some(event) = record.downtime_events.last_mut().filter(|e| e.is_open()) {
                        let duration = (now - event.start).num_seconds().max(0);
                        event.end = Some(now);
                        event.duration_sec = Some(duration);
                        tracing::info!("Uptime: {} back online after {}s", device, duration);
                    } else {
                        tracing::info!("Uptime: {} back online", device);
                    }
                }
            }

            if record.downtime_events.len() > MAX_DOWNTIME_EVENTS {
                let excess = record.downtime_events.len() - MAX_DOWNTIME_EVENTS;
                record.downtime_events.drain(..excess);
            }
        }

        record.current_state = new_state;
    }

    pub fn get(&self, device: &str) -> Option<&UptimeRecord> {
        self.records.get(device)
    }

    pub fn records(&self) -> &BTreeMap<String, UptimeRecord> {
        &self.records
    }
}

/// Percentage of online checks, rounded to two places; 100 when nothing was checked.
fn pct(online: u64, checks: u64) -> f64 {
    if checks == 0 {
        return 100.0;
    }
    ((online as f64 / checks as f64) * 100.0 * 100.0).round() / 100.0
}
