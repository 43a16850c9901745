//! Full-text search over catalog records (SQLite FTS5).

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{CatalogBatch, CatalogRecord, SyncCursor};
use exn::ResultExt;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};
use tracing::instrument;

/// Maximum number of hits returned when the caller has no preference.
pub const DEFAULT_LIMIT: u32 = 100;

/// Turn free text into an FTS5 match expression.
///
/// Every whitespace-separated term becomes a quoted prefix query and the
/// terms are ANDed, so `"beach hou"` matches "Beach House". Quoting keeps FTS5
/// operators and punctuation in user input from being interpreted.
fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| term.replace('"', "\"\""))
        .filter(|term| term.chars().any(char::is_alphanumeric))
        .map(|term| format!("\"{term}\"*"))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

/// Ranked full-text index over artist, album, title, and path.
///
/// Derived from the [`RecordStore`](crate::RecordStore); every write keys on
/// the record path, so indexing the same record twice leaves one entry. The
/// index keeps its own [`SyncCursor`], advanced in the same transaction as
/// each batch, so a lagging index can be told apart from a current one even
/// when both hold the same number of entries.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    pool: SqlitePool,
}

impl From<&Database> for SearchIndex {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

impl SearchIndex {
    async fn delete<'e>(executor: impl SqliteExecutor<'e>, path: &str) -> Result<()> {
        sqlx::query(include_str!("../queries/search_delete.sql"))
            .bind(path)
            .execute(executor)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn insert<'e>(executor: impl SqliteExecutor<'e>, record: &CatalogRecord) -> Result<()> {
        sqlx::query(include_str!("../queries/search_insert.sql"))
            .bind(&record.path)
            .bind(&record.artist)
            .bind(&record.album)
            .bind(&record.title)
            .execute(executor)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Index a record, replacing whatever was indexed for its path.
    pub async fn upsert(&self, record: &CatalogRecord) -> Result<()> {
        self.apply(std::slice::from_ref(record), &[]).await
    }

    /// Drop a path from the index. Unknown paths are ignored.
    pub async fn remove(&self, path: &str) -> Result<()> {
        Self::delete(&self.pool, path).await
    }

    async fn put_cursor<'e>(executor: impl SqliteExecutor<'e>, cursor: SyncCursor) -> Result<()> {
        let value = i64::try_from(cursor.0).or_raise(|| ErrorKind::InvalidData("index cursor"))?;
        sqlx::query(include_str!("../queries/search_cursor_put.sql"))
            .bind(value)
            .execute(executor)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn write(tx: &mut SqliteConnection, added: &[CatalogRecord], removed: &[String]) -> Result<()> {
        for record in added {
            Self::delete(&mut *tx, &record.path).await?;
            Self::insert(&mut *tx, record).await?;
        }
        for path in removed {
            Self::delete(&mut *tx, path).await?;
        }
        Ok(())
    }

    /// Index `added` and drop `removed` in one transaction, in that order.
    ///
    /// Leaves the index cursor alone; see [`apply_batch`](Self::apply_batch).
    #[instrument(skip_all, fields(added = added.len(), removed = removed.len()))]
    pub async fn apply(&self, added: &[CatalogRecord], removed: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Self::write(&mut *tx, added, removed).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Apply a batch and advance the index cursor to its cursor, atomically.
    #[instrument(skip_all, fields(cursor = %batch.cursor, added = batch.added.len(), removed = batch.removed.len()))]
    pub async fn apply_batch(&self, batch: &CatalogBatch) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Self::write(&mut *tx, &batch.added, &batch.removed).await?;
        Self::put_cursor(&mut *tx, batch.cursor).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Cursor of the last batch applied with [`apply_batch`](Self::apply_batch)
    /// or [`rebuild`](Self::rebuild); zero if there was none.
    pub async fn cursor(&self) -> Result<SyncCursor> {
        let row: Option<(i64,)> = sqlx::query_as(include_str!("../queries/search_cursor_get.sql"))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        match row {
            Some((value,)) => u64::try_from(value).map(SyncCursor).or_raise(|| ErrorKind::InvalidData("index cursor")),
            None => Ok(SyncCursor::default()),
        }
    }

    /// Replace the whole index with `records`, which reflect the store as of
    /// `cursor`.
    #[instrument(skip_all, fields(records = records.len(), cursor = %cursor))]
    pub async fn rebuild(&self, records: &[CatalogRecord], cursor: SyncCursor) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/search_clear.sql"))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for record in records {
            Self::insert(&mut *tx, record).await?;
        }
        Self::put_cursor(&mut *tx, cursor).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::info!(records = records.len(), "Search index rebuilt");
        Ok(())
    }

    /// Number of indexed entries.
    pub async fn len(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(include_str!("../queries/search_count.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("index count"))
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Paths matching `query`, best match first.
    ///
    /// A query with no searchable terms matches nothing.
    #[instrument(skip(self))]
    pub async fn query(&self, query: &str, limit: u32) -> Result<Vec<String>> {
        let Some(expression) = match_expression(query) else {
            return Ok(Vec::new());
        };
        let rows: Vec<(String,)> = sqlx::query_as(include_str!("../queries/search_query.sql"))
            .bind(expression)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(path,)| path).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(path: &str, artist: &str, album: &str, title: &str) -> CatalogRecord {
        CatalogRecord {
            artist: artist.to_string(),
            album: album.to_string(),
            title: title.to_string(),
            ..CatalogRecord::new(path)
        }
    }

    async fn index() -> SearchIndex {
        SearchIndex::from(&Database::connect_in_memory().await.unwrap())
    }

    async fn seeded() -> SearchIndex {
        let index = index().await;
        index
            .apply(
                &[
                    record("bh/myth.mp3", "Beach House", "Bloom", "Myth"),
                    record("bh/lazuli.mp3", "Beach House", "Bloom", "Lazuli"),
                    record("low/lullaby.wav", "Low", "I Could Live in Hope", "Lullaby"),
                    record("misc/beach-sounds.wav", "Field Recordings", "Coast", "Waves"),
                ],
                &[],
            )
            .await
            .unwrap();
        index
    }

    #[rstest]
    #[case("beach house", Some("\"beach\"* \"house\"*"))]
    #[case("  low  ", Some("\"low\"*"))]
    #[case("say \"hi\"", Some("\"say\"* \"\"\"hi\"\"\"*"))]
    #[case("AND OR NOT", Some("\"AND\"* \"OR\"* \"NOT\"*"))]
    #[case("- * :", None)]
    #[case("", None)]
    fn test_match_expression(#[case] query: &str, #[case] expected: Option<&str>) {
        assert_eq!(match_expression(query).as_deref(), expected);
    }

    #[tokio::test]
    async fn test_query_matches_any_indexed_field() {
        let index = seeded().await;
        assert_eq!(index.query("lazuli", DEFAULT_LIMIT).await.unwrap(), vec!["bh/lazuli.mp3"]);
        assert_eq!(index.query("hope", DEFAULT_LIMIT).await.unwrap(), vec!["low/lullaby.wav"]);
        // Path segments are tokenized too.
        assert_eq!(index.query("sounds", DEFAULT_LIMIT).await.unwrap(), vec!["misc/beach-sounds.wav"]);
    }

    #[tokio::test]
    async fn test_query_terms_are_anded_prefixes() {
        let index = seeded().await;
        let mut hits = index.query("beach hou", DEFAULT_LIMIT).await.unwrap();
        hits.sort();
        assert_eq!(hits, vec!["bh/lazuli.mp3", "bh/myth.mp3"]);
        assert!(index.query("beach lullaby", DEFAULT_LIMIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_respects_limit_and_empty_input() {
        let index = seeded().await;
        assert_eq!(index.query("beach", 1).await.unwrap().len(), 1);
        assert!(index.query("   ", DEFAULT_LIMIT).await.unwrap().is_empty());
        assert!(index.query("\"", DEFAULT_LIMIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_twice_leaves_one_entry() {
        let index = index().await;
        let rec = record("a.mp3", "Broadcast", "Tender Buttons", "Tears in the Typing Pool");
        index.upsert(&rec).await.unwrap();
        index.upsert(&rec).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        assert_eq!(index.query("typing", DEFAULT_LIMIT).await.unwrap(), vec!["a.mp3"]);
    }

    #[tokio::test]
    async fn test_replacing_record_drops_old_terms() {
        let index = index().await;
        index.upsert(&record("a.mp3", "Broadcast", "Haha Sound", "Pendulum")).await.unwrap();
        index.upsert(&record("a.mp3", "Broadcast", "Haha Sound", "Valerie")).await.unwrap();
        assert!(index.query("pendulum", DEFAULT_LIMIT).await.unwrap().is_empty());
        assert_eq!(index.query("valerie", DEFAULT_LIMIT).await.unwrap(), vec!["a.mp3"]);
    }

    #[tokio::test]
    async fn test_removed_path_is_never_returned() {
        let index = seeded().await;
        index.remove("bh/myth.mp3").await.unwrap();
        let hits = index.query("beach", DEFAULT_LIMIT).await.unwrap();
        assert!(!hits.contains(&"bh/myth.mp3".to_string()));
        assert_eq!(index.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_contents() {
        let index = seeded().await;
        index.rebuild(&[record("only.mp3", "Grouper", "Ruins", "Labyrinth")], SyncCursor(7)).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        assert_eq!(index.cursor().await.unwrap(), SyncCursor(7));
        assert!(index.query("beach", DEFAULT_LIMIT).await.unwrap().is_empty());
        assert_eq!(index.query("grouper", DEFAULT_LIMIT).await.unwrap(), vec!["only.mp3"]);
    }

    #[tokio::test]
    async fn test_apply_batch_advances_cursor_with_contents() {
        let index = index().await;
        assert_eq!(index.cursor().await.unwrap(), SyncCursor(0));
        let batch = CatalogBatch {
            cursor: SyncCursor(3),
            added: vec![record("a.mp3", "Broadcast", "Work and Non Work", "Accidentals")],
            removed: vec![],
        };
        index.apply_batch(&batch).await.unwrap();
        assert_eq!(index.cursor().await.unwrap(), SyncCursor(3));
        assert_eq!(index.query("accidentals", DEFAULT_LIMIT).await.unwrap(), vec!["a.mp3"]);

        // Cursorless writes leave it where it was.
        index.remove("a.mp3").await.unwrap();
        assert_eq!(index.cursor().await.unwrap(), SyncCursor(3));
    }
}
