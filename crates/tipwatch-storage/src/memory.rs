//! In-memory storage backend.
//!
//! Keeps both cursor tables and the donation records in RAM behind a single
//! mutex, so truncation and commits are atomic with respect to each other.
//! Useful for tests and short-lived runs that don't need persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tipwatch_core::cursor::{CursorEntry, CursorTable};
use tipwatch_core::error::IndexerError;
use tipwatch_core::store::{CursorStore, DonationStore};
use tipwatch_core::types::DonationRecord;

#[derive(Default)]
struct Tables {
    heads: BTreeMap<u64, String>,
    donations: BTreeMap<u64, String>,
    /// Keyed by `(height, log_index)`.
    records: BTreeMap<(u64, u64), DonationRecord>,
}

impl Tables {
    fn cursor(&self, table: CursorTable) -> &BTreeMap<u64, String> {
        match table {
            CursorTable::Heads => &self.heads,
            CursorTable::Donations => &self.donations,
        }
    }

    fn cursor_mut(&mut self, table: CursorTable) -> &mut BTreeMap<u64, String> {
        match table {
            CursorTable::Heads => &mut self.heads,
            CursorTable::Donations => &mut self.donations,
        }
    }
}

/// In-memory cursor and donation storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, IndexerError> {
        self.tables
            .lock()
            .map_err(|_| IndexerError::Storage("in-memory store lock poisoned".into()))
    }

    /// Every row of `table`, ascending by height.
    pub fn rows(&self, table: CursorTable) -> Result<Vec<CursorEntry>, IndexerError> {
        Ok(self
            .lock()?
            .cursor(table)
            .iter()
            .map(|(height, hash)| CursorEntry::new(*height, hash.as_str()))
            .collect())
    }
}

#[async_trait]
impl CursorStore for InMemoryStorage {
    async fn latest(&self, table: CursorTable) -> Result<Option<CursorEntry>, IndexerError> {
        Ok(self
            .lock()?
            .cursor(table)
            .last_key_value()
            .map(|(height, hash)| CursorEntry::new(*height, hash.as_str())))
    }

    async fn at(
        &self,
        table: CursorTable,
        height: u64,
    ) -> Result<Option<CursorEntry>, IndexerError> {
        Ok(self
            .lock()?
            .cursor(table)
            .get(&height)
            .map(|hash| CursorEntry::new(height, hash.as_str())))
    }

    async fn append(&self, table: CursorTable, entry: &CursorEntry) -> Result<(), IndexerError> {
        let mut tables = self.lock()?;
        let rows = tables.cursor_mut(table);
        if rows.contains_key(&entry.height) {
            return Err(IndexerError::Storage(format!(
                "{table} cursor already has a row at height {}",
                entry.height
            )));
        }
        rows.insert(entry.height, entry.hash.clone());
        Ok(())
    }

    async fn truncate_from(&self, table: CursorTable, from: u64) -> Result<u64, IndexerError> {
        let mut tables = self.lock()?;
        let removed = tables.cursor_mut(table).split_off(&from).len() as u64;
        if table == CursorTable::Donations {
            tables.records.split_off(&(from, 0));
        }
        Ok(removed)
    }
}

#[async_trait]
impl DonationStore for InMemoryStorage {
    async fn commit_block(
        &self,
        entry: &CursorEntry,
        records: &[DonationRecord],
    ) -> Result<(), IndexerError> {
        let mut tables = self.lock()?;
        if tables.donations.contains_key(&entry.height) {
            return Err(IndexerError::Storage(format!(
                "donations cursor already has a row at height {}",
                entry.height
            )));
        }
        for record in records {
            if tables.records.contains_key(&(record.height, record.log_index)) {
                return Err(IndexerError::Storage(format!(
                    "duplicate donation at height {} log {}",
                    record.height, record.log_index
                )));
            }
        }
        tables.donations.insert(entry.height, entry.hash.clone());
        for record in records {
            tables
                .records
                .insert((record.height, record.log_index), record.clone());
        }
        Ok(())
    }

    async fn donations_from(
        &self,
        from: u64,
        limit: usize,
    ) -> Result<Vec<DonationRecord>, IndexerError> {
        Ok(self
            .lock()?
            .records
            .range((from, 0)..)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn donation_count(&self) -> Result<u64, IndexerError> {
        Ok(self.lock()?.records.len() as u64)
    }
}
