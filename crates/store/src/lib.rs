//! Durable half of the catalog mirror.
//!
//! One SQLite database holds two things:
//! - **Records**: a key/value namespace where `"file_" + path` maps to a
//!   JSON-encoded [`CatalogRecord`] and the reserved key `"index"` maps to
//!   the [`SyncCursor`] of the last fully applied batch. Cursor and data are
//!   always committed in the same transaction.
//! - **Search**: an FTS5 table over artist, album, title, and path. It is
//!   derived data; if it is lost or falls behind it can be rebuilt from the
//!   records with [`SearchIndex::rebuild`].

mod db;
pub mod error;
mod models;
mod records;
mod search;

pub use crate::db::Database;
pub use crate::models::{CatalogBatch, CatalogRecord, SyncCursor};
pub use crate::records::RecordStore;
pub use crate::search::{DEFAULT_LIMIT, SearchIndex};
