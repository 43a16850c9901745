//! Content-addressed blob cache for downloaded tracks.
//!
//! One file per track, named by the [`BlobKey`] of its catalog path. An
//! entry moves from absent, to partial (`<key>.part`, being written by a
//! [`PartialEntry`]), to complete (`<key>`). A complete entry is only ever
//! produced by renaming a fully written and synced partial, and is never
//! written to again.

mod cache;
pub mod error;
mod key;

pub use crate::cache::{BlobCache, PartialEntry};
pub use crate::key::BlobKey;
