//! Storage traits for cursor tables and donation records.
//!
//! Implementations live in `tipwatch-storage`: `InMemoryStorage`,
//! `SqliteStorage` and `PostgresStorage`.

use async_trait::async_trait;

use crate::cursor::{CursorEntry, CursorTable};
use crate::error::IndexerError;
use crate::types::DonationRecord;

/// Append-only cursor tables with atomic truncation.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// The row with the highest height, or `None` if the table is empty.
    async fn latest(&self, table: CursorTable) -> Result<Option<CursorEntry>, IndexerError>;

    /// The row stored at exactly `height`.
    async fn at(&self, table: CursorTable, height: u64)
        -> Result<Option<CursorEntry>, IndexerError>;

    /// Insert a single row. Fails if a row already exists at that height.
    async fn append(&self, table: CursorTable, entry: &CursorEntry) -> Result<(), IndexerError>;

    /// Delete every row with `height >= from` in one transaction.
    ///
    /// Truncating [`CursorTable::Donations`] also deletes every donation
    /// record with `height >= from` in the same transaction.
    /// Returns the number of cursor rows removed.
    async fn truncate_from(&self, table: CursorTable, from: u64) -> Result<u64, IndexerError>;
}

/// Donation records, written together with the donation cursor.
#[async_trait]
pub trait DonationStore: CursorStore {
    /// Append `entry` to the donation cursor and insert `records` atomically.
    ///
    /// A crash can never leave the cursor advanced without its records or
    /// records without their cursor row.
    async fn commit_block(
        &self,
        entry: &CursorEntry,
        records: &[DonationRecord],
    ) -> Result<(), IndexerError>;

    /// Records with `height >= from`, ordered by height then log index.
    async fn donations_from(
        &self,
        from: u64,
        limit: usize,
    ) -> Result<Vec<DonationRecord>, IndexerError>;

    /// Total number of stored donation records.
    async fn donation_count(&self) -> Result<u64, IndexerError>;
}
