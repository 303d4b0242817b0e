//! The polling loop that drives an indexer.
//!
//! Each iteration runs one reconciliation pass and then decides how long to
//! wait:
//! - still behind (full batch indexed, or a truncation just happened) → `min_interval`
//! - caught up, or the batch stopped early → `poll_interval`
//! - transient failure → exponential backoff with jitter
//! - fatal failure → the loop returns the error
//!
//! Cancellation is observed while a pass is in flight and while sleeping.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::IndexerConfig;
use crate::error::IndexerError;
use crate::reorg::Divergence;

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing to index.
    UpToDate,
    /// Heights `from..=to` were indexed. `complete` is `false` when the batch
    /// stopped before the end of its window.
    Advanced { from: u64, to: u64, complete: bool },
    /// The local cursor diverged; rows from `from` upward were deleted.
    Truncated {
        from: u64,
        removed: u64,
        divergence: Divergence,
    },
}

impl PassOutcome {
    /// Returns `true` if the next pass should run without waiting for new blocks.
    pub fn is_behind(&self) -> bool {
        matches!(
            self,
            Self::Advanced { complete: true, .. } | Self::Truncated { .. }
        )
    }
}

/// One indexer that can be driven by [`run_loop`].
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Name used in log fields.
    fn name(&self) -> &str;

    /// Run a single reconciliation pass.
    async fn reconcile_once(&self) -> Result<PassOutcome, IndexerError>;
}

/// Timing policy for [`run_loop`].
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Wait between passes once caught up.
    pub poll_interval: Duration,
    /// Wait between passes while catching up.
    pub min_interval: Duration,
    /// Delay policy after transient failures.
    pub backoff: Backoff,
    /// Stop after this many passes (`None` = run until cancelled).
    pub max_passes: Option<u64>,
}

impl PollOptions {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            min_interval: Duration::from_millis(config.min_interval_ms),
            backoff: Backoff::new(config.backoff.clone()),
            max_passes: None,
        }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::from_config(&IndexerConfig::default())
    }
}

/// Counters collected while the loop runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub passes: u64,
    pub heights_indexed: u64,
    pub truncations: u64,
    pub failures: u64,
}

impl LoopStats {
    fn record(&mut self, outcome: &PassOutcome) {
        match outcome {
            PassOutcome::UpToDate => {}
            PassOutcome::Advanced { from, to, .. } => self.heights_indexed += to - from + 1,
            PassOutcome::Truncated { .. } => self.truncations += 1,
        }
    }
}

/// Drive `reconciler` until cancelled, `max_passes` is reached, or a fatal
/// error occurs.
pub async fn run_loop<R: Reconciler + ?Sized>(
    reconciler: &R,
    options: &PollOptions,
    cancel: &CancellationToken,
) -> Result<LoopStats, IndexerError> {
    let name = reconciler.name();
    let mut stats = LoopStats::default();
    let mut consecutive_failures = 0u32;

    info!(indexer = name, "indexer loop started");

    loop {
        if options.max_passes.is_some_and(|max| stats.passes >= max) {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = reconciler.reconcile_once() => result,
        };
        stats.passes += 1;

        let delay = match result {
            Ok(outcome) => {
                consecutive_failures = 0;
                stats.record(&outcome);
                debug!(indexer = name, ?outcome, "pass complete");
                if outcome.is_behind() {
                    options.min_interval
                } else {
                    options.poll_interval
                }
            }
            Err(IndexerError::Cancelled) => break,
            Err(e) if e.is_transient() => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                stats.failures += 1;
                let delay = options.backoff.delay(consecutive_failures);
                warn!(
                    indexer = name,
                    error = %e,
                    attempt = consecutive_failures,
                    delay_ms = delay.as_millis() as u64,
                    "pass failed, backing off"
                );
                delay
            }
            Err(e) => {
                error!(indexer = name, error = %e, "fatal indexer error");
                return Err(e);
            }
        };

        if delay.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(
        indexer = name,
        passes = stats.passes,
        heights = stats.heights_indexed,
        truncations = stats.truncations,
        "indexer loop stopped"
    );
    Ok(stats)
}
