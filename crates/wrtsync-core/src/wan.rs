//! WAN traffic metrics
//!
//! Turns successive interface byte counters into totals, per-cycle deltas
//! and rates. The router's counters reset on reboot (and may wrap), so a
//! sample lower than the previous one counts as zero traffic and simply
//! becomes the new baseline.

use crate::parse::WanCounters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bytes per (binary) gigabyte
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Convert a byte count to binary gigabytes
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

/// One counter reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WanSample {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub sampled_at: DateTime<Utc>,
}

impl WanSample {
    pub fn new(counters: WanCounters, sampled_at: DateTime<Utc>) -> Self {
        Self {
            rx_bytes: counters.rx_bytes,
            tx_bytes: counters.tx_bytes,
            sampled_at,
        }
    }
}

/// Derived WAN values for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WanSnapshot {
    pub total_download_gb: f64,
    pub total_upload_gb: f64,
    /// `None` when no rate could be computed this cycle (not the same as idle)
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub rx_delta_bytes: u64,
    pub tx_delta_bytes: u64,
}

/// Rolling WAN counter state
///
/// The baseline (rx, tx, time) is replaced as a whole; there is no state in
/// which one of them has advanced and the others have not.
#[derive(Debug, Clone, Default)]
pub struct WanMetrics {
    baseline: Option<WanSample>,
    latest: Option<WanSnapshot>,
}

impl WanMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last accepted sample
    pub fn baseline(&self) -> Option<&WanSample> {
        self.baseline.as_ref()
    }

    /// Most recent derived values
    pub fn latest(&self) -> Option<&WanSnapshot> {
        self.latest.as_ref()
    }

    /// Feed this cycle's sample; `None` leaves all state untouched
    pub fn ingest(&mut self, sample: Option<WanSample>) -> Option<WanSnapshot> {
        let sample = sample?;

        let (rx_delta_bytes, tx_delta_bytes, download_mbps, upload_mbps) = match self.baseline {
            Some(prev) => {
                let rx = sample.rx_bytes.saturating_sub(prev.rx_bytes);
                let tx = sample.tx_bytes.saturating_sub(prev.tx_bytes);
                let elapsed = sample
                    .sampled_at
                    .signed_duration_since(prev.sampled_at)
                    .num_milliseconds() as f64
                    / 1000.0;
                (rx, tx, rate_mbps(rx, elapsed), rate_mbps(tx, elapsed))
            }
            None => (0, 0, None, None),
        };

        let snapshot = WanSnapshot {
            total_download_gb: bytes_to_gb(sample.rx_bytes),
            total_upload_gb: bytes_to_gb(sample.tx_bytes),
            download_mbps,
            upload_mbps,
            rx_delta_bytes,
            tx_delta_bytes,
        };

        self.baseline = Some(sample);
        self.latest = Some(snapshot);
        Some(snapshot)
    }
}

/// Megabits per second, only for a strictly positive interval
fn rate_mbps(delta_bytes: u64, elapsed_secs: f64) -> Option<f64> {
    (elapsed_secs > 0.0).then(|| delta_bytes as f64 * 8.0 / 1_000_000.0 / elapsed_secs)
}
