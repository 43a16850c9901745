//! In-memory, path-ordered projection of the record store.

use encore_store::CatalogRecord;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

type Records = Arc<RwLock<BTreeMap<String, CatalogRecord>>>;

/// Writable side of the catalog cache.
///
/// Owned by the [`SyncEngine`](crate::SyncEngine); everything else reads
/// through a [`CatalogView`]. The write lock is only held for the in-memory
/// update of a single batch, never across I/O.
#[derive(Debug, Default)]
pub struct CatalogCache {
    records: Records,
}

impl CatalogCache {
    pub fn from_records(records: impl IntoIterator<Item = CatalogRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.path.clone(), r)).collect();
        Self { records: Arc::new(RwLock::new(map)) }
    }

    /// A read-only handle sharing this cache.
    pub fn view(&self) -> CatalogView {
        CatalogView { records: Arc::clone(&self.records) }
    }

    /// Insert/replace `added`, then drop `removed`.
    pub(crate) fn apply(&self, added: &[CatalogRecord], removed: &[String]) {
        let mut records = self.records.write();
        for record in added {
            records.insert(record.path.clone(), record.clone());
        }
        for path in removed {
            records.remove(path);
        }
    }
}

/// Read-only, cloneable handle onto the catalog cache.
#[derive(Debug, Clone)]
pub struct CatalogView {
    records: Records,
}

impl CatalogView {
    /// All known records, sorted by path.
    pub fn list(&self) -> Vec<CatalogRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn get(&self, path: &str) -> Option<CatalogRecord> {
        self.records.read().get(path).cloned()
    }

    /// Look up `paths` in order, silently skipping any that are unknown.
    pub fn resolve<I, S>(&self, paths: I) -> Vec<CatalogRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let records = self.records.read();
        paths.into_iter().filter_map(|path| records.get(path.as_ref()).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(records: &[CatalogRecord]) -> Vec<&str> {
        records.iter().map(|r| r.path.as_str()).collect()
    }

    #[test]
    fn test_listing_is_sorted_regardless_of_insertion_order() {
        let cache = CatalogCache::from_records([CatalogRecord::new("c.mp3"), CatalogRecord::new("a.mp3")]);
        cache.apply(&[CatalogRecord::new("b.wav")], &[]);
        assert_eq!(paths(&cache.view().list()), vec!["a.mp3", "b.wav", "c.mp3"]);
    }

    #[test]
    fn test_apply_replaces_then_removes() {
        let cache = CatalogCache::default();
        let view = cache.view();
        cache.apply(&[CatalogRecord { title: "Old".into(), ..CatalogRecord::new("a.mp3") }], &[]);
        cache.apply(&[CatalogRecord { title: "New".into(), ..CatalogRecord::new("a.mp3") }], &[]);
        assert_eq!(view.len(), 1);
        assert_eq!(view.get("a.mp3").unwrap().title, "New");

        cache.apply(&[CatalogRecord::new("b.mp3")], &["a.mp3".to_string()]);
        assert!(view.get("a.mp3").is_none());
        assert_eq!(paths(&view.list()), vec!["b.mp3"]);
    }

    #[test]
    fn test_resolve_skips_unknown_paths() {
        let cache = CatalogCache::from_records([CatalogRecord::new("a.mp3"), CatalogRecord::new("b.mp3")]);
        let resolved = cache.view().resolve(["b.mp3", "gone.mp3", "a.mp3"]);
        assert_eq!(paths(&resolved), vec!["b.mp3", "a.mp3"]);
    }
}
