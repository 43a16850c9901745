use std::fmt;

/// Content key of a cached track: the BLAKE3 hash of its catalog path.
///
/// Rendered as 64 lowercase hex characters, which is also the entry's file
/// name inside the cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobKey(blake3::Hash);

impl BlobKey {
    pub fn for_path(path: &str) -> Self {
        Self(blake3::hash(path.as_bytes()))
    }

    /// Parse a cache file name back into a key.
    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex).ok().map(Self)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.to_hex().as_str())
    }
}
