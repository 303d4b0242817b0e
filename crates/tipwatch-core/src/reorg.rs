//! Reorg-safe catch-up: the algorithm shared by the head tracker and the
//! donation indexer.
//!
//! Each reconciliation pass either
//! 1. finds that the local cursor no longer matches its source of truth and
//!    returns the height to truncate from, or
//! 2. returns a bounded window of heights to index next.
//!
//! Divergence is never repaired in place: the diverging height and
//! everything above it is deleted, together with any data derived from it.
//! Three shapes of divergence are detected:
//! - **Hash mismatch**: the source reports another block at the cursor height
//! - **Missing**: the source has nothing at the cursor height
//! - **Source behind**: the source tip is below the cursor height (chain shrank)

use std::ops::Range;

use async_trait::async_trait;

use crate::cursor::CursorEntry;
use crate::error::IndexerError;
use crate::types::same_hash;

/// A source of truth that can be asked which block is canonical at a height.
///
/// For the head tracker this is the RPC provider; for the donation indexer it
/// is the head tracker's cursor table.
#[async_trait]
pub trait HashSource: Send + Sync {
    /// Highest height the source currently knows, `None` if it knows nothing.
    async fn tip(&self) -> Result<Option<u64>, IndexerError>;

    /// Canonical hash at `height`, `None` if the source has no block there.
    async fn hash_at(&self, height: u64) -> Result<Option<String>, IndexerError>;
}

/// Why a local cursor was found to diverge from its source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    /// The source has a different block at the cursor height.
    HashMismatch {
        height: u64,
        local: String,
        remote: String,
    },
    /// The source has no block at the cursor height.
    Missing { height: u64 },
    /// The source tip dropped below the cursor height.
    SourceBehind {
        height: u64,
        source_tip: Option<u64>,
    },
}

impl Divergence {
    /// The height of the local cursor that was checked.
    pub fn height(&self) -> u64 {
        match self {
            Self::HashMismatch { height, .. }
            | Self::Missing { height }
            | Self::SourceBehind { height, .. } => *height,
        }
    }

    /// First height to delete: every local row at or above it is invalid.
    pub fn truncate_from(&self) -> u64 {
        match self {
            Self::HashMismatch { height, .. } | Self::Missing { height } => *height,
            Self::SourceBehind {
                height,
                source_tip: Some(tip),
            } => (tip + 1).min(*height),
            Self::SourceBehind {
                source_tip: None, ..
            } => 0,
        }
    }
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HashMismatch { height, local, remote } => {
                write!(f, "hash mismatch at {height}: local {local}, source {remote}")
            }
            Self::Missing { height } => write!(f, "block {height} missing at source"),
            Self::SourceBehind {
                height,
                source_tip: Some(tip),
            } => write!(f, "source tip {tip} below cursor {height}"),
            Self::SourceBehind { height, .. } => {
                write!(f, "source empty, cursor at {height}")
            }
        }
    }
}

/// A bounded, ascending run of heights to index in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpWindow {
    /// First height to index.
    pub start: u64,
    /// Number of heights in the window.
    pub len: u64,
}

impl CatchUpWindow {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Last height in the window, `None` if empty.
    pub fn end(&self) -> Option<u64> {
        (self.len > 0).then(|| self.start + self.len - 1)
    }

    /// Heights in ascending order.
    pub fn heights(&self) -> Range<u64> {
        self.start..self.start + self.len
    }
}

/// What a reconciliation pass has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Delete local rows from `divergence.truncate_from()` upward, then stop.
    Truncate(Divergence),
    /// Index the heights in the window.
    CatchUp(CatchUpWindow),
}

/// Catch-up parameters shared by both indexers.
#[derive(Debug, Clone, Copy)]
pub struct CatchUp {
    floor: u64,
    max_batch: u64,
}

impl CatchUp {
    /// `floor` is the virtual cursor used while the local table is empty, so
    /// the first indexed height is `floor + 1`.
    pub fn new(floor: u64, max_batch: u64) -> Self {
        Self {
            floor,
            max_batch: max_batch.max(1),
        }
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    pub fn max_batch(&self) -> u64 {
        self.max_batch
    }

    /// Compute `min(max_batch, tip - cursor)` heights above the cursor.
    pub fn window(&self, local: Option<&CursorEntry>, tip: u64) -> CatchUpWindow {
        let base = local.map(|c| c.height).unwrap_or(self.floor);
        CatchUpWindow {
            start: base + 1,
            len: tip.saturating_sub(base).min(self.max_batch),
        }
    }

    /// Verify `local` against `source` and decide the next step.
    pub async fn plan<H: HashSource + ?Sized>(
        &self,
        local: Option<&CursorEntry>,
        source: &H,
    ) -> Result<Plan, IndexerError> {
        let tip = source.tip().await?;

        if let Some(cursor) = local {
            match tip {
                Some(tip) if tip >= cursor.height => {}
                source_tip => {
                    return Ok(Plan::Truncate(Divergence::SourceBehind {
                        height: cursor.height,
                        source_tip,
                    }));
                }
            }

            match source.hash_at(cursor.height).await? {
                None => {
                    return Ok(Plan::Truncate(Divergence::Missing {
                        height: cursor.height,
                    }));
                }
                Some(remote) if !same_hash(&remote, &cursor.hash) => {
                    return Ok(Plan::Truncate(Divergence::HashMismatch {
                        height: cursor.height,
                        local: cursor.hash.clone(),
                        remote,
                    }));
                }
                Some(_) => {}
            }
        }

        let window = match tip {
            Some(tip) => self.window(local, tip),
            None => CatchUpWindow {
                start: self.floor + 1,
                len: 0,
            },
        };
        Ok(Plan::CatchUp(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Chain(BTreeMap<u64, String>);

    impl Chain {
        fn linear(range: std::ops::RangeInclusive<u64>) -> Self {
            Self(range.map(|h| (h, format!("0x{h:x}"))).collect())
        }
    }

    #[async_trait]
    impl HashSource for Chain {
        async fn tip(&self) -> Result<Option<u64>, IndexerError> {
            Ok(self.0.keys().next_back().copied())
        }

        async fn hash_at(&self, height: u64) -> Result<Option<String>, IndexerError> {
            Ok(self.0.get(&height).cloned())
        }
    }

    #[test]
    fn window_from_floor_when_empty() {
        let catch_up = CatchUp::new(100, 2);
        let w = catch_up.window(None, 105);
        assert_eq!(w.start, 101);
        assert_eq!(w.len, 2);
        assert_eq!(w.end(), Some(102));
        assert_eq!(w.heights().collect::<Vec<_>>(), vec![101, 102]);
    }

    #[test]
    fn window_is_bounded_and_clamped() {
        let catch_up = CatchUp::new(0, 50);
        let cursor = CursorEntry::new(104, "0x68");
        assert_eq!(catch_up.window(Some(&cursor), 105).len, 1);
        assert_eq!(catch_up.window(Some(&cursor), 1_000).len, 50);
        assert!(catch_up.window(Some(&cursor), 104).is_empty());
        assert!(catch_up.window(Some(&cursor), 90).is_empty());
    }

    #[test]
    fn zero_batch_is_raised_to_one() {
        assert_eq!(CatchUp::new(0, 0).max_batch(), 1);
    }

    #[tokio::test]
    async fn in_sync_cursor_yields_window() {
        let chain = Chain::linear(0..=10);
        let cursor = CursorEntry::new(4, "0x4");
        let plan = CatchUp::new(0, 3).plan(Some(&cursor), &chain).await.unwrap();
        assert_eq!(plan, Plan::CatchUp(CatchUpWindow { start: 5, len: 3 }));
    }

    #[tokio::test]
    async fn hash_mismatch_truncates_at_cursor() {
        let chain = Chain::linear(0..=60);
        let cursor = CursorEntry::new(50, "0xa");
        let plan = CatchUp::new(0, 10).plan(Some(&cursor), &chain).await.unwrap();
        match plan {
            Plan::Truncate(d) => {
                assert!(matches!(d, Divergence::HashMismatch { height: 50, .. }));
                assert_eq!(d.truncate_from(), 50);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hash_compare_ignores_case() {
        let mut chain = Chain::linear(0..=5);
        chain.0.insert(5, "0xABCD".into());
        let cursor = CursorEntry::new(5, "0xabcd");
        let plan = CatchUp::new(0, 10).plan(Some(&cursor), &chain).await.unwrap();
        assert!(matches!(plan, Plan::CatchUp(w) if w.is_empty()));
    }

    #[tokio::test]
    async fn missing_block_truncates_at_cursor() {
        let mut chain = Chain::linear(0..=20);
        chain.0.remove(&12);
        let cursor = CursorEntry::new(12, "0xc");
        let plan = CatchUp::new(0, 10).plan(Some(&cursor), &chain).await.unwrap();
        assert_eq!(plan, Plan::Truncate(Divergence::Missing { height: 12 }));
    }

    #[tokio::test]
    async fn shrinking_source_truncates_above_its_tip() {
        let chain = Chain::linear(0..=47);
        let cursor = CursorEntry::new(50, "0x32");
        let plan = CatchUp::new(0, 10).plan(Some(&cursor), &chain).await.unwrap();
        match plan {
            Plan::Truncate(d) => {
                assert_eq!(
                    d,
                    Divergence::SourceBehind {
                        height: 50,
                        source_tip: Some(47)
                    }
                );
                assert_eq!(d.truncate_from(), 48);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_source_truncates_everything() {
        let chain = Chain(BTreeMap::new());
        let cursor = CursorEntry::new(7, "0x7");
        let plan = CatchUp::new(0, 10).plan(Some(&cursor), &chain).await.unwrap();
        match plan {
            Plan::Truncate(d) => assert_eq!(d.truncate_from(), 0),
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_source_and_empty_cursor_is_noop() {
        let chain = Chain(BTreeMap::new());
        let plan = CatchUp::new(100, 10).plan(None, &chain).await.unwrap();
        assert!(matches!(plan, Plan::CatchUp(w) if w.is_empty()));
    }
}
