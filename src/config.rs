//! Configuration module for netpulse.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Fixed allowance on top of `count * timeout` for process startup and DNS.
const PROBE_OVERHEAD: Duration = Duration::from_secs(5);

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Echo requests sent per probe (default: 5)
    pub ping_count: u32,
    /// Per-attempt timeout in seconds (default: 0.5)
    pub ping_timeout: f64,
    /// Seconds between cycle ticks (default: 2)
    pub ping_interval: u64,
    /// History points kept per device (default: 1800, 30 min at 2s)
    pub max_history_points: usize,
    /// Maximum concurrent probes per cycle (default: 10)
    pub max_workers: usize,
    /// Seconds between history/uptime flushes (default: 10)
    pub flush_interval: u64,
    /// Directory holding every persisted file (default: "/app/data")
    pub data_dir: PathBuf,
    /// Fallback device list, `name:addr` pairs separated by commas
    pub default_devices: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ping_count: 5,
            ping_timeout: 0.5,
            ping_interval: 2,
            max_history_points: 1800,
            max_workers: 10,
            flush_interval: 10,
            data_dir: PathBuf::from("/app/data"),
            default_devices: String::new(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PING_COUNT`, `PING_TIMEOUT`, `PING_INTERVAL`
    /// - `MAX_HISTORY_POINTS`, `MAX_WORKERS`, `FLUSH_INTERVAL`
    /// - `NETPULSE_DATA_DIR`, `DEFAULT_DEVICES`
    ///
    /// Unparsable or non-positive values keep their default.
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(count) = positive(&lookup, "PING_COUNT") {
            cfg.ping_count = count;
        }
        if let Some(timeout) = lookup("PING_TIMEOUT").and_then(|s| s.trim().parse::<f64>().ok()) {
            if timeout > 0.0 && timeout.is_finite() {
                cfg.ping_timeout = timeout;
            }
        }
        if let Some(interval) = positive(&lookup, "PING_INTERVAL") {
            cfg.ping_interval = interval;
        }
        if let Some(points) = positive(&lookup, "MAX_HISTORY_POINTS") {
            cfg.max_history_points = points;
        }
        if let Some(workers) = positive(&lookup, "MAX_WORKERS") {
            cfg.max_workers = workers;
        }
        if let Some(flush) = positive(&lookup, "FLUSH_INTERVAL") {
            cfg.flush_interval = flush;
        }
        if let Some(dir) = lookup("NETPULSE_DATA_DIR").filter(|s| !s.is_empty()) {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(devices) = lookup("DEFAULT_DEVICES") {
            cfg.default_devices = devices;
        }

        cfg
    }

    /// Timeout budget for a single echo request.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ping_timeout)
    }

    /// Maximum wall time one device probe may occupy a worker.
    pub fn probe_deadline(&self) -> Duration {
        self.probe_timeout() * self.ping_count + PROBE_OVERHEAD
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }
}

fn positive<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|s| s.trim().parse::<T>().ok())
        .filter(|v| *v > T::default())
}
