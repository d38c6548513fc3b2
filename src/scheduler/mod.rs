//! Scheduler module: the probing loop.
//!
//! Each tick reads the device set, probes every device with bounded
//! parallelism, feeds the results into history and uptime tracking and
//! writes the cycle snapshot. History and uptime are flushed on a slower
//! cadence.

mod fanout;

pub use fanout::*;

use crate::config::MonitorConfig;
use crate::devices::DeviceSource;
use crate::probe::Prober;
use crate::store::{
    DataFile, DeviceSnapshot, HistoryPoint, HistoryStore, Snapshot, Store, UptimeTracker,
};

use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Devices in the set this cycle
    pub devices: usize,
    /// Devices that produced a result
    pub probed: usize,
    pub reachable: usize,
    /// Devices whose probe task failed
    pub failed: usize,
    pub snapshot_written: bool,
    pub flushed: bool,
}

/// Owns the in-memory history and uptime state and drives the probing loop.
pub struct Scheduler<P, D> {
    config: MonitorConfig,
    store: Arc<Store>,
    prober: Arc<P>,
    devices: D,
    history: HistoryStore,
    uptime: UptimeTracker,
    last_flush: Instant,
}

impl<P: Prober, D: DeviceSource> Scheduler<P, D> {
    /// Create a scheduler, restoring history and uptime from the store.
    pub fn new(config: MonitorConfig, store: Arc<Store>, prober: P, devices: D) -> Self {
        let history = HistoryStore::from_series(
            store.load_entries(DataFile::History),
            config.max_history_points,
        );
        let uptime = UptimeTracker::from_records(store.load_entries(DataFile::Uptime));

        tracing::info!(
            "Scheduler: restored history for {} devices, uptime for {} devices",
            history.snapshot().len(),
            uptime.records().len()
        );

        Self {
            config,
            store,
            prober: Arc::new(prober),
            devices,
            history,
            uptime,
            last_flush: Instant::now(),
        }
    }

    /// Run cycles until `shutdown` completes, then flush.
    ///
    /// A cycle is never interrupted; shutdown is observed between cycles.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            "Scheduler: starting (count={}, interval={}s, timeout={}s, workers={})",
            self.config.ping_count,
            self.config.ping_interval,
            self.config.ping_timeout,
            self.config.max_workers
        );

        let mut interval = tokio::time::interval(self.config.cycle_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let report = self.run_cycle().await;
                    tracing::debug!(
                        "Scheduler: cycle done, {}/{} reachable, {} failed",
                        report.reachable,
                        report.devices,
                        report.failed
                    );
                }
            }
        }

        tracing::info!("Scheduler: stopping, flushing state");
        self.flush();
    }

    /// Run one probing cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let devices = self.devices.load_devices();
        if devices.is_empty() {
            tracing::debug!("Scheduler: no devices configured");
            return CycleReport::default();
        }

        let removed = self.history.prune(devices.keys().map(String::as_str));
        if !removed.is_empty() {
            tracing::info!("Scheduler: dropped history for removed devices {:?}", removed);
        }

        let mut report = CycleReport {
            devices: devices.len(),
            ..Default::default()
        };
        let mut snapshot = Snapshot::new(Utc::now());
        let pool = self.config.max_workers.min(devices.len());

        let history = &mut self.history;
        let uptime = &mut self.uptime;
        probe_all(&self.prober, &devices, pool, |outcome| match outcome.result {
            Ok(result) => {
                let now = Utc::now();
                history.append(&outcome.name, HistoryPoint::from_result(now, &result));
                uptime.update(&outcome.name, result.reachable, now);

                report.probed += 1;
                if result.reachable {
                    report.reachable += 1;
                }
                snapshot.devices.insert(
                    outcome.name,
                    DeviceSnapshot {
                        result,
                        ip: outcome.address,
                    },
                );
            }
            Err(e) => {
                tracing::error!(
                    "Scheduler: probe of {} ({}) failed: {}",
                    outcome.name,
                    outcome.address,
                    e
                );
            }
        })
        .await;
        // Includes tasks lost without an outcome
        report.failed = report.devices - report.probed;

        if snapshot.devices.is_empty() {
            tracing::warn!("Scheduler: no results this cycle, keeping previous snapshot");
        } else {
            match self.store.save(DataFile::Snapshot, &snapshot) {
                Ok(()) => report.snapshot_written = true,
                Err(e) => tracing::error!("Scheduler: failed to write snapshot: {}", e),
            }
        }

        if self.last_flush.elapsed() >= self.config.flush_interval() {
            self.flush();
            report.flushed = true;
        }

        report
    }

    /// Persist history and uptime. Failures are logged and the previous
    /// files are left as they were.
    pub fn flush(&mut self) {
        if let Err(e) = self.store.save(DataFile::History, self.history.snapshot()) {
            tracing::error!("Scheduler: failed to save history: {}", e);
        }
        if let Err(e) = self.store.save(DataFile::Uptime, self.uptime.records()) {
            tracing::error!("Scheduler: failed to save uptime: {}", e);
        }
        self.last_flush = Instant::now();
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn uptime(&self) -> &UptimeTracker {
        &self.uptime
    }
}
