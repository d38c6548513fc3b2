//! Probe module for network monitoring.
//!
//! A probe sends a fixed number of echo requests to one address and
//! summarizes the replies. Probes never fail: every error path degrades
//! to an unreachable result.

mod ping;

pub use ping::*;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
///
/// These stay inside the probe layer; callers only ever see a `ProbeResult`.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Outcome of probing one address.
///
/// `reachable`, `packets_received > 0` and `latency.is_some()` always agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub reachable: bool,
    /// Mean round-trip time in milliseconds
    pub latency: Option<f64>,
    /// Percentage of requests without a reply, 0-100
    pub packet_loss: f64,
    /// Sample standard deviation of round-trip times in milliseconds
    pub jitter: Option<f64>,
    pub packets_sent: u32,
    pub packets_received: u32,
}

impl ProbeResult {
    /// The result reported for every failure path.
    pub fn unreachable(packets_sent: u32) -> Self {
        Self {
            reachable: false,
            latency: None,
            packet_loss: 100.0,
            jitter: None,
            packets_sent,
            packets_received: 0,
        }
    }

    /// Summarize round-trip samples (milliseconds).
    ///
    /// `reported_loss` is the loss percentage printed by the probe tool, if
    /// it printed one; otherwise loss is 0 when any reply arrived.
    pub fn from_samples(packets_sent: u32, rtts: &[f64], reported_loss: Option<f64>) -> Self {
        if rtts.is_empty() {
            return Self::unreachable(packets_sent);
        }

        let n = rtts.len() as f64;
        let mean = rtts.iter().sum::<f64>() / n;
        let jitter = if rtts.len() > 1 {
            let variance = rtts.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
            round2(variance.sqrt())
        } else {
            0.0
        };

        Self {
            reachable: true,
            latency: Some(round2(mean)),
            packet_loss: reported_loss.unwrap_or(0.0),
            jitter: Some(jitter),
            packets_sent,
            packets_received: rtts.len() as u32,
        }
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Something that can check the reachability of an address.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, address: &str) -> impl Future<Output = ProbeResult> + Send;
}
