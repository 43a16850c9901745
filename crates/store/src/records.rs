//! Key/value persistence for catalog records and the sync cursor.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{CatalogBatch, CatalogRecord, SyncCursor};
use exn::ResultExt;
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::instrument;

/// Key prefix for catalog records.
pub(crate) const RECORD_PREFIX: &str = "file_";
/// Smallest key greater than every `RECORD_PREFIX` key ('`' follows '_').
const RECORD_PREFIX_END: &str = "file`";
/// Reserved key holding the cursor of the last applied batch.
pub(crate) const CURSOR_KEY: &str = "index";

#[derive(sqlx::FromRow)]
struct EntryRow {
    key: String,
    value: Vec<u8>,
}

impl TryFrom<EntryRow> for CatalogRecord {
    type Error = crate::error::Error;

    fn try_from(row: EntryRow) -> Result<Self> {
        let record: CatalogRecord = serde_json::from_slice(&row.value).or_raise(|| ErrorKind::InvalidData("record"))?;
        if row.key.strip_prefix(RECORD_PREFIX) != Some(record.path.as_str()) {
            exn::bail!(ErrorKind::InvalidData("record key does not match record path"));
        }
        Ok(record)
    }
}

fn record_key(path: &str) -> String {
    format!("{RECORD_PREFIX}{path}")
}

/// Persistent mapping of track path to [`CatalogRecord`], plus the
/// [`SyncCursor`].
///
/// Every mutation goes through [`apply_batch`](Self::apply_batch) so that the
/// cursor can never be persisted ahead of the records it describes.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl From<&Database> for RecordStore {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

impl RecordStore {
    async fn read_cursor<'e>(executor: impl SqliteExecutor<'e>) -> Result<SyncCursor> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(CURSOR_KEY)
            .fetch_optional(executor)
            .await
            .or_raise(|| ErrorKind::Database)?;
        match row {
            Some(row) => serde_json::from_slice(&row.value).or_raise(|| ErrorKind::InvalidData("cursor")),
            None => Ok(SyncCursor::default()),
        }
    }

    async fn put<'e>(executor: impl SqliteExecutor<'e>, key: &str, value: Vec<u8>) -> Result<()> {
        sqlx::query(include_str!("../queries/put_entry.sql"))
            .bind(key)
            .bind(value)
            .execute(executor)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// The cursor of the last fully applied batch; zero if never synced.
    pub async fn cursor(&self) -> Result<SyncCursor> {
        Self::read_cursor(&self.pool).await
    }

    /// Look up a single record by track path.
    pub async fn get(&self, path: &str) -> Result<Option<CatalogRecord>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(record_key(path))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CatalogRecord::try_from).transpose()
    }

    /// Every stored record, in path order.
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> Result<Vec<CatalogRecord>> {
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/scan_range.sql"))
            .bind(RECORD_PREFIX)
            .bind(RECORD_PREFIX_END)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CatalogRecord::try_from).collect()
    }

    /// Number of stored records.
    pub async fn len(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(include_str!("../queries/count_range.sql"))
            .bind(RECORD_PREFIX)
            .bind(RECORD_PREFIX_END)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("record count"))
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Apply a batch in a single transaction: upsert every added record,
    /// delete every removed path, then persist the batch cursor.
    ///
    /// A batch whose cursor is behind the persisted one is rejected with
    /// [`ErrorKind::CursorRegression`] and nothing is written. Repeating the
    /// persisted cursor is allowed (acknowledgment batches do exactly that).
    #[instrument(skip_all, fields(cursor = %batch.cursor, added = batch.added.len(), removed = batch.removed.len()))]
    pub async fn apply_batch(&self, batch: &CatalogBatch) -> Result<()> {
        let mut encoded = Vec::with_capacity(batch.added.len());
        for record in &batch.added {
            if record.path.is_empty() {
                exn::bail!(ErrorKind::InvalidData("record path is empty"));
            }
            let value = serde_json::to_vec(record).or_raise(|| ErrorKind::InvalidData("record"))?;
            encoded.push((record_key(&record.path), value));
        }
        let cursor = serde_json::to_vec(&batch.cursor).or_raise(|| ErrorKind::InvalidData("cursor"))?;

        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let current = Self::read_cursor(&mut *tx).await?;
        if batch.cursor < current {
            // Dropping the transaction rolls it back.
            exn::bail!(ErrorKind::CursorRegression { current: current.0, received: batch.cursor.0 });
        }
        for (key, value) in encoded {
            Self::put(&mut *tx, &key, value).await?;
        }
        for path in &batch.removed {
            sqlx::query(include_str!("../queries/delete_entry.sql"))
                .bind(record_key(path))
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        Self::put(&mut *tx, CURSOR_KEY, cursor).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::debug!(cursor = %batch.cursor, "Catalog batch committed");
        Ok(())
    }
}
