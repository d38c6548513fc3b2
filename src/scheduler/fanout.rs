//! Bounded parallel fan-out of probes within one cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::probe::{ProbeResult, Prober};

/// Result of probing one device, tagged with the device it belongs to.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub name: String,
    pub address: String,
    /// `Err` carries the reason the probe task itself failed
    pub result: Result<ProbeResult, String>,
}

/// Probe every device with at most `pool` probes in flight.
///
/// `on_outcome` is called as each probe completes, in completion order.
/// Returns once every probe has finished.
pub async fn probe_all<P, F>(
    prober: &Arc<P>,
    devices: &BTreeMap<String, String>,
    pool: usize,
    mut on_outcome: F,
) where
    P: Prober,
    F: FnMut(ProbeOutcome),
{
    let permits = Arc::new(Semaphore::new(pool.max(1)));
    let mut tasks = JoinSet::new();

    for (name, address) in devices {
        let permits = permits.clone();
        let prober = prober.clone();
        let name = name.clone();
        let address = address.clone();

        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;

            // Run the probe in its own task so a panic is reported as this
            // device's failure instead of escaping the task group
            let target = address.clone();
            let result = tokio::spawn(async move { prober.probe(&target).await })
                .await
                .map_err(|e| e.to_string());

            ProbeOutcome {
                name,
                address,
                result,
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => on_outcome(outcome),
            Err(e) => tracing::error!("Scheduler: probe task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records how many probes ran at the same time.
    #[derive(Default)]
    struct CountingProber {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Prober for CountingProber {
        async fn probe(&self, address: &str) -> ProbeResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if address == "panic" {
                panic!("probe exploded");
            }
            ProbeResult::from_samples(1, &[1.0], None)
        }
    }

    fn devices(n: usize) -> BTreeMap<String, String> {
        (0..n)
            .map(|i| (format!("dev{}", i), format!("10.0.0.{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let prober = Arc::new(CountingProber::default());
        let mut seen = Vec::new();

        probe_all(&prober, &devices(12), 3, |outcome| seen.push(outcome.name)).await;

        assert_eq!(seen.len(), 12);
        let peak = prober.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {}", peak);
        assert!(peak >= 2, "probes never overlapped");
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let prober = Arc::new(CountingProber::default());
        let mut targets = devices(3);
        targets.insert("bad".to_string(), "panic".to_string());

        let mut ok = Vec::new();
        let mut failed = Vec::new();
        probe_all(&prober, &targets, 2, |outcome| match outcome.result {
            Ok(_) => ok.push(outcome.name),
            Err(_) => failed.push((outcome.name, outcome.address)),
        })
        .await;

        ok.sort();
        assert_eq!(ok, vec!["dev0", "dev1", "dev2"]);
        assert_eq!(failed, vec![("bad".to_string(), "panic".to_string())]);
    }

    #[tokio::test]
    async fn test_no_devices() {
        let prober = Arc::new(CountingProber::default());
        let mut calls = 0;
        probe_all(&prober, &BTreeMap::new(), 4, |_| calls += 1).await;
        assert_eq!(calls, 0);
    }
}
