//! netpulse - device reachability and uptime monitor.
//!
//! Probes the devices listed in the data directory, keeps a bounded latency
//! history per device and rolling uptime statistics, and publishes them as
//! JSON files for the dashboard.

pub mod config;
pub mod devices;
pub mod probe;
pub mod scheduler;
pub mod store;
