use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tlc_core::config::{ProbeConfig, MAX_PROBE_CONCURRENCY};
use tlc_core::{CancelSignal, CoverageRecord, PartitionKey};
use tracing::info;

use crate::prober::Prober;
use crate::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRunOptions {
    /// Concurrent probes, clamped to `1..=MAX_PROBE_CONCURRENCY`.
    pub concurrency: usize,
    /// Minimum spacing between request starts across all workers.
    pub throttle: Duration,
}

impl Default for ProbeRunOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            throttle: Duration::from_millis(200),
        }
    }
}

impl ProbeRunOptions {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            throttle: Duration::from_millis(config.throttle_ms),
        }
    }
}

/// Probe `keys` on a bounded pool, returning records in key order.
///
/// Every HEAD request, retries included, goes through one shared throttle,
/// so request starts stay `options.throttle` apart whatever the concurrency.
/// Once `cancel` fires no new probe starts; records already produced are
/// still returned.
pub async fn probe_all(
    prober: &Prober,
    keys: &[PartitionKey],
    options: &ProbeRunOptions,
    cancel: &CancelSignal,
) -> Vec<CoverageRecord> {
    let concurrency = options.concurrency.clamp(1, MAX_PROBE_CONCURRENCY);
    let throttle = Throttle::new(options.throttle);
    let started = Instant::now();
    info!(
        partitions = keys.len(),
        concurrency,
        "Probe cycle started against {}",
        prober.base_url()
    );

    let throttle = &throttle;
    let results: Vec<Option<CoverageRecord>> = stream::iter(keys)
        .map(|key| async move {
            if cancel.is_cancelled() {
                return None;
            }
            Some(prober.probe_throttled(key, Some(throttle)).await)
        })
        .buffered(concurrency)
        .collect()
        .await;

    let records: Vec<CoverageRecord> = results.into_iter().flatten().collect();
    let summary = ProbeSummary::from_records(&records);
    info!(
        probed = records.len(),
        skipped = keys.len() - records.len(),
        available = summary.available,
        unavailable = summary.unavailable,
        errors = summary.errors,
        "Probe cycle finished in {:.1}s",
        started.elapsed().as_secs_f64()
    );
    records
}

/// Totals over a set of coverage records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub available: usize,
    /// Definitive answers other than "available" (missing, forbidden, empty, unexpected).
    pub unavailable: usize,
    /// Exhausted transient failures (`error:*` notes).
    pub errors: usize,
}

impl ProbeSummary {
    pub fn from_records(records: &[CoverageRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            if record.is_available {
                summary.available += 1;
            } else if record.is_error() {
                summary.errors += 1;
            } else {
                summary.unavailable += 1;
            }
        }
        summary
    }
}
