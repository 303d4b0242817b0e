//! SQLite storage backend.
//!
//! Persists both cursor tables and the donation records to a single SQLite
//! file. Uses `sqlx` with WAL mode so the donation indexer can read the
//! tracker's table while the tracker writes.
//!
//! # Usage
//! ```rust,no_run
//! use tipwatch_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./tipwatch.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use tipwatch_core::cursor::{CursorEntry, CursorTable};
use tipwatch_core::error::IndexerError;
use tipwatch_core::store::{CursorStore, DonationStore};
use tipwatch_core::types::DonationRecord;

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed cursor and donation storage.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./tipwatch.db"`) or a full
    /// SQLite URL (`"sqlite:./tipwatch.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the
    /// pool is pinned to a single long-lived connection.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        for table in [CursorTable::Heads, CursorTable::Donations] {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    height     INTEGER PRIMARY KEY,
                    hash       TEXT    NOT NULL,
                    indexed_at INTEGER NOT NULL
                );",
                table.table_name()
            ))
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS donations (
                height        INTEGER NOT NULL,
                log_index     INTEGER NOT NULL,
                block_hash    TEXT    NOT NULL,
                tx_hash       TEXT    NOT NULL,
                donor         TEXT    NOT NULL,
                recipient     TEXT    NOT NULL,
                token_address TEXT    NOT NULL,
                net_amount    TEXT    NOT NULL,
                commission    TEXT    NOT NULL,
                donor_name    TEXT    NOT NULL,
                message       TEXT    NOT NULL,
                PRIMARY KEY (height, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_donations_recipient ON donations(recipient, height);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!("SqliteStorage schema initialized");
        Ok(())
    }

    /// Get the underlying connection pool (for custom queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CursorEntry, IndexerError> {
    let height: i64 = row.try_get("height").map_err(storage_err)?;
    let hash: String = row.try_get("hash").map_err(storage_err)?;
    Ok(CursorEntry::new(height as u64, hash))
}

fn donation_from_row(row: &SqliteRow) -> Result<DonationRecord, IndexerError> {
    Ok(DonationRecord {
        height: row.try_get::<i64, _>("height").map_err(storage_err)? as u64,
        log_index: row.try_get::<i64, _>("log_index").map_err(storage_err)? as u64,
        block_hash: row.try_get("block_hash").map_err(storage_err)?,
        tx_hash: row.try_get("tx_hash").map_err(storage_err)?,
        donor: row.try_get("donor").map_err(storage_err)?,
        recipient: row.try_get("recipient").map_err(storage_err)?,
        token_address: row.try_get("token_address").map_err(storage_err)?,
        net_amount: row.try_get("net_amount").map_err(storage_err)?,
        commission: row.try_get("commission").map_err(storage_err)?,
        donor_name: row.try_get("donor_name").map_err(storage_err)?,
        message: row.try_get("message").map_err(storage_err)?,
    })
}

#[async_trait]
impl CursorStore for SqliteStorage {
    async fn latest(&self, table: CursorTable) -> Result<Option<CursorEntry>, IndexerError> {
        let row = sqlx::query(&format!(
            "SELECT height, hash FROM {} ORDER BY height DESC LIMIT 1",
            table.table_name()
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn at(
        &self,
        table: CursorTable,
        height: u64,
    ) -> Result<Option<CursorEntry>, IndexerError> {
        let row = sqlx::query(&format!(
            "SELECT height, hash FROM {} WHERE height = ?",
            table.table_name()
        ))
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn append(&self, table: CursorTable, entry: &CursorEntry) -> Result<(), IndexerError> {
        sqlx::query(&format!(
            "INSERT INTO {} (height, hash, indexed_at) VALUES (?, ?, ?)",
            table.table_name()
        ))
        .bind(entry.height as i64)
        .bind(&entry.hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn truncate_from(&self, table: CursorTable, from: u64) -> Result<u64, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let removed = sqlx::query(&format!(
            "DELETE FROM {} WHERE height >= ?",
            table.table_name()
        ))
        .bind(from as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?
        .rows_affected();

        if table == CursorTable::Donations {
            let records = sqlx::query("DELETE FROM donations WHERE height >= ?")
                .bind(from as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?
                .rows_affected();
            debug!(from, records, "donation records removed");
        }

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(format!("commit truncate: {e}")))?;
        Ok(removed)
    }
}

#[async_trait]
impl DonationStore for SqliteStorage {
    async fn commit_block(
        &self,
        entry: &CursorEntry,
        records: &[DonationRecord],
    ) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("INSERT INTO donation_cursor (height, hash, indexed_at) VALUES (?, ?, ?)")
            .bind(entry.height as i64)
            .bind(&entry.hash)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        for record in records {
            sqlx::query(
                "INSERT INTO donations
                    (height, log_index, block_hash, tx_hash, donor, recipient,
                     token_address, net_amount, commission, donor_name, message)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.height as i64)
            .bind(record.log_index as i64)
            .bind(&record.block_hash)
            .bind(&record.tx_hash)
            .bind(&record.donor)
            .bind(&record.recipient)
            .bind(&record.token_address)
            .bind(&record.net_amount)
            .bind(&record.commission)
            .bind(&record.donor_name)
            .bind(&record.message)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        // Dropping `tx` on any error above rolls everything back.
        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(format!("commit block {}: {e}", entry.height)))?;
        Ok(())
    }

    async fn donations_from(
        &self,
        from: u64,
        limit: usize,
    ) -> Result<Vec<DonationRecord>, IndexerError> {
        let rows = sqlx::query(
            "SELECT * FROM donations
             WHERE height >= ?
             ORDER BY height ASC, log_index ASC
             LIMIT ?",
        )
        .bind(from as i64)
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(donation_from_row).collect()
    }

    async fn donation_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM donations")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let count: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donation(height: u64, log_index: u64) -> DonationRecord {
        DonationRecord {
            height,
            block_hash: format!("0x{height:064x}"),
            tx_hash: format!("0x{:064x}", height * 100 + log_index),
            log_index,
            donor: "0x1111111111111111111111111111111111111111".into(),
            recipient: "0x2222222222222222222222222222222222222222".into(),
            token_address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".into(),
            net_amount: "1000".into(),
            commission: "50".into(),
            donor_name: "Alice".into(),
            message: "gg".into(),
        }
    }

    #[tokio::test]
    async fn cursor_append_latest_at() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.latest(CursorTable::Heads).await.unwrap().is_none());

        store
            .append(CursorTable::Heads, &CursorEntry::new(100, "0xAAA"))
            .await
            .unwrap();
        store
            .append(CursorTable::Heads, &CursorEntry::new(101, "0xbbb"))
            .await
            .unwrap();

        let latest = store.latest(CursorTable::Heads).await.unwrap().unwrap();
        assert_eq!(latest, CursorEntry::new(101, "0xbbb"));
        let at = store.at(CursorTable::Heads, 100).await.unwrap().unwrap();
        assert_eq!(at.hash, "0xaaa");
        assert!(store.at(CursorTable::Heads, 99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tables_are_independent() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .append(CursorTable::Heads, &CursorEntry::new(5, "0x05"))
            .await
            .unwrap();
        assert!(store.latest(CursorTable::Donations).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_height_is_storage_error() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let entry = CursorEntry::new(1, "0x01");
        store.append(CursorTable::Heads, &entry).await.unwrap();
        let err = store.append(CursorTable::Heads, &entry).await.unwrap_err();
        assert!(err.is_transient(), "storage errors are retried: {err}");
    }

    #[tokio::test]
    async fn commit_block_and_query() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .commit_block(&CursorEntry::new(10, "0x0a"), &[donation(10, 2), donation(10, 0)])
            .await
            .unwrap();
        store
            .commit_block(&CursorEntry::new(11, "0x0b"), &[])
            .await
            .unwrap();

        assert_eq!(store.donation_count().await.unwrap(), 2);
        assert_eq!(
            store.latest(CursorTable::Donations).await.unwrap().unwrap().height,
            11
        );
        let rows = store.donations_from(0, 10).await.unwrap();
        assert_eq!(rows[0].log_index, 0);
        assert_eq!(rows[1], donation(10, 2));
    }

    #[tokio::test]
    async fn failed_commit_rolls_back() {
        let store = SqliteStorage::in_memory().await.unwrap();
        // Two records with the same key: the second insert fails.
        let err = store
            .commit_block(&CursorEntry::new(7, "0x07"), &[donation(7, 0), donation(7, 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));
        assert!(store.latest(CursorTable::Donations).await.unwrap().is_none());
        assert_eq!(store.donation_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn truncate_donations_cascades() {
        let store = SqliteStorage::in_memory().await.unwrap();
        for h in 48..=52 {
            store
                .commit_block(&CursorEntry::new(h, "0x01"), &[donation(h, 0)])
                .await
                .unwrap();
        }

        let removed = store.truncate_from(CursorTable::Donations, 50).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.donation_count().await.unwrap(), 2);
        assert_eq!(
            store.latest(CursorTable::Donations).await.unwrap().unwrap().height,
            49
        );
    }

    #[tokio::test]
    async fn truncate_heads_keeps_donations() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .append(CursorTable::Heads, &CursorEntry::new(50, "0xa"))
            .await
            .unwrap();
        store
            .commit_block(&CursorEntry::new(50, "0xa"), &[donation(50, 0)])
            .await
            .unwrap();

        assert_eq!(store.truncate_from(CursorTable::Heads, 0).await.unwrap(), 1);
        assert!(store.latest(CursorTable::Heads).await.unwrap().is_none());
        assert_eq!(store.donation_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn file_backed_persists_across_reopen() {
        let path = std::env::temp_dir().join(format!("tipwatch-{}.db", std::process::id()));
        let path = path.to_string_lossy().to_string();
        {
            let store = SqliteStorage::open(&path).await.unwrap();
            store
                .append(CursorTable::Heads, &CursorEntry::new(3, "0x03"))
                .await
                .unwrap();
            store.pool().close().await;
        }
        let store = SqliteStorage::open(&path).await.unwrap();
        assert_eq!(
            store.latest(CursorTable::Heads).await.unwrap().unwrap().height,
            3
        );
        store.pool().close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path}{suffix}"));
        }
    }
}
