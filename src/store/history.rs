//! Bounded per-device latency history.

use std::collections::{BTreeMap, HashSet, VecDeque};

use super::models::HistoryPoint;

/// Fixed-capacity FIFO series of history points, one per device.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    capacity: usize,
    series: BTreeMap<String, VecDeque<HistoryPoint>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
        }
    }

    /// Rebuild from persisted series, keeping the newest `capacity` points of each.
    pub fn from_series(series: BTreeMap<String, Vec<HistoryPoint>>, capacity: usize) -> Self {
        let mut store = Self::new(capacity);
        for (device, points) in series {
            let skip = points.len().saturating_sub(store.capacity);
            let mut buf = VecDeque::with_capacity(store.capacity);
            buf.extend(points.into_iter().skip(skip));
            store.series.insert(device, buf);
        }
        store
    }

    /// Append a point, evicting the oldest one when the series is full.
    pub fn append(&mut self, device: &str, point: HistoryPoint) {
        let capacity = self.capacity;
        let buf = self
            .series
            .entry(device.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity.min(64)));
        if buf.len() == capacity {
            buf.pop_front();
        }
        buf.push_back(point);
    }

    /// Drop the history of every device not in `current`.
    ///
    /// Returns the names that were removed.
    pub fn prune<'a, I>(&mut self, current: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: HashSet<&str> = current.into_iter().collect();
        let removed: Vec<String> = self
            .series
            .keys()
            .filter(|name| !keep.contains(name.as_str()))
            .cloned()
            .collect();
        for name in &removed {
            self.series.remove(name);
        }
        removed
    }

    /// Read-only view of every series, for persistence.
    pub fn snapshot(&self) -> &BTreeMap<String, VecDeque<HistoryPoint>> {
        &self.series
    }

    pub fn get(&self, device: &str) -> Option<&VecDeque<HistoryPoint>> {
        self.series.get(device)
    }

    pub fn len(&self, device: &str) -> usize {
        self.series.get(device).map_or(0, VecDeque::len)
    }
}
