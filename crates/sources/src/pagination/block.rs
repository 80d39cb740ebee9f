//! Timestamp-to-block resolution for block-addressed sources.

use async_trait::async_trait;
use backfill_core::{ErrorKind, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Smoothing factor for the observed block time.
const EMA_ALPHA: f64 = 0.2;

/// Source of block timestamps.
#[async_trait]
pub trait BlockClock: Send + Sync {
    /// Number of the newest block.
    async fn head(&self) -> Result<u64>;

    /// Timestamp of block `number`.
    async fn timestamp(&self, number: u64) -> Result<DateTime<Utc>>;
}

/// A block and its timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Finds the block closest to a target time.
///
/// An estimate from a reference block and the running average block time
/// narrows a binary search to `±search_radius` blocks around the guess.
#[derive(Debug, Clone)]
pub struct BlockLocator {
    avg_block_secs: f64,
    search_radius: u64,
}

impl BlockLocator {
    #[must_use]
    pub fn new(avg_block_secs: f64, search_radius: u64) -> Self {
        Self {
            avg_block_secs: avg_block_secs.max(f64::EPSILON),
            search_radius: search_radius.max(1),
        }
    }

    #[must_use]
    pub fn avg_block_secs(&self) -> f64 {
        self.avg_block_secs
    }

    /// Estimated block number at `target` extrapolated from `reference`.
    #[must_use]
    pub fn estimate(&self, reference: BlockRef, target: DateTime<Utc>) -> u64 {
        let delta_secs = (target - reference.timestamp).num_seconds() as f64;
        let delta_blocks = (delta_secs / self.avg_block_secs).round();
        let estimate = reference.number as f64 + delta_blocks;
        if estimate <= 0.0 {
            0
        } else {
            estimate as u64
        }
    }

    /// Folds an observed span into the running average block time.
    pub fn observe(&mut self, from: BlockRef, to: BlockRef) {
        let blocks = to.number.abs_diff(from.number);
        if blocks == 0 {
            return;
        }
        let secs = (to.timestamp - from.timestamp).num_seconds().unsigned_abs() as f64;
        let sample = secs / blocks as f64;
        if sample > 0.0 {
            self.avg_block_secs = EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * self.avg_block_secs;
        }
    }

    /// Locates the block whose timestamp is closest to `target`, searching
    /// no further than `head`. Ties go to the earlier block.
    ///
    /// # Errors
    /// Propagates clock errors; `SourceExhausted` if `target` is after the
    /// head block.
    pub async fn locate(
        &mut self,
        clock: &dyn BlockClock,
        reference: BlockRef,
        head: BlockRef,
        target: DateTime<Utc>,
    ) -> Result<BlockRef> {
        if target > head.timestamp {
            return Err(ErrorKind::SourceExhausted(format!(
                "target {target} is after head block {} ({})",
                head.number, head.timestamp
            )));
        }

        let guess = self.estimate(reference, target).min(head.number);
        let mut lo = guess.saturating_sub(self.search_radius);
        let mut hi = guess.saturating_add(self.search_radius).min(head.number);

        // Invariant once established: ts(lo) <= target <= ts(hi), or the
        // bound is pinned at the search edge.
        let mut lo_ts = clock.timestamp(lo).await?;
        let mut hi_ts = if hi == head.number {
            head.timestamp
        } else {
            clock.timestamp(hi).await?
        };
        if target <= lo_ts {
            let found = BlockRef {
                number: lo,
                timestamp: lo_ts,
            };
            self.observe(reference, found);
            return Ok(found);
        }
        if target >= hi_ts {
            let found = BlockRef {
                number: hi,
                timestamp: hi_ts,
            };
            self.observe(reference, found);
            return Ok(found);
        }

        let mut lookups = 2usize;
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            let mid_ts = clock.timestamp(mid).await?;
            lookups += 1;
            if mid_ts < target {
                lo = mid;
                lo_ts = mid_ts;
            } else {
                hi = mid;
                hi_ts = mid_ts;
            }
        }

        let found = if (target - lo_ts) <= (hi_ts - target) {
            BlockRef {
                number: lo,
                timestamp: lo_ts,
            }
        } else {
            BlockRef {
                number: hi,
                timestamp: hi_ts,
            }
        };

        debug!(
            target = %target,
            block = found.number,
            lookups = lookups,
            avg_block_secs = self.avg_block_secs,
            "Located block"
        );
        self.observe(reference, found);
        Ok(found)
    }
}
