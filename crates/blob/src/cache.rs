use crate::BlobKey;
use crate::error::{ErrorKind, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

const PARTIAL_SUFFIX: &str = ".part";

/// Directory of complete track blobs, one file per [`BlobKey`].
#[derive(Debug, Clone)]
pub struct BlobCache {
    root: PathBuf,
}

impl BlobCache {
    /// Open the cache rooted at `root`, creating the directory if needed.
    ///
    /// Partial entries left behind by an interrupted process are deleted:
    /// nothing can resume them, and they must never be mistaken for
    /// complete blobs.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        // Blocking is fine here; this happens once at startup.
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            std::fs::create_dir_all(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        }
        for entry in std::fs::read_dir(&root).map_err(|e| ErrorKind::from_io(e, &root))? {
            let path = entry.map_err(|e| ErrorKind::from_io(e, &root))?.path();
            if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(PARTIAL_SUFFIX)) {
                tracing::info!(path = %path.display(), "Removing stale partial blob");
                std::fs::remove_file(&path).map_err(|e| ErrorKind::from_io(e, &path))?;
            }
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the complete blob for `key` lives (whether or not it exists).
    pub fn path_of(&self, key: &BlobKey) -> PathBuf {
        self.root.join(key.to_string())
    }

    fn partial_path_of(&self, key: &BlobKey) -> PathBuf {
        self.root.join(format!("{key}{PARTIAL_SUFFIX}"))
    }

    /// Path of the complete blob for `key`, if there is one.
    pub async fn get(&self, key: &BlobKey) -> Result<Option<PathBuf>> {
        let path = self.path_of(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ErrorKind::from_io(e, &path).into()),
        }
    }

    pub async fn contains(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Whole contents of the complete blob for `key`, if there is one.
    pub async fn read(&self, key: &BlobKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_of(key);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ErrorKind::from_io(e, &path).into()),
        }
    }

    /// Start writing the blob for `key`.
    ///
    /// Any previous partial for the same key is truncated.
    pub async fn begin(&self, key: &BlobKey) -> Result<PartialEntry> {
        let partial = self.partial_path_of(key);
        let file = File::create(&partial).await.map_err(|e| ErrorKind::from_io(e, &partial))?;
        tracing::debug!(key = %key, "Started partial blob");
        Ok(PartialEntry {
            key: *key,
            partial,
            complete: self.path_of(key),
            file,
            written: 0,
        })
    }

    /// Write a complete blob in one go.
    pub async fn put(&self, key: &BlobKey, data: &[u8]) -> Result<PathBuf> {
        let mut entry = self.begin(key).await?;
        entry.append(data).await?;
        entry.commit().await
    }

    /// Delete the complete blob for `key`. Returns whether one existed.
    pub async fn remove(&self, key: &BlobKey) -> Result<bool> {
        let path = self.path_of(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ErrorKind::from_io(e, &path).into()),
        }
    }

    /// Keys of every complete blob.
    pub async fn entries(&self) -> Result<Vec<BlobKey>> {
        let mut dir = fs::read_dir(&self.root).await.map_err(|e| ErrorKind::from_io(e, &self.root))?;
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| ErrorKind::from_io(e, &self.root))? {
            if let Some(key) = entry.file_name().to_str().and_then(BlobKey::from_hex) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

/// A blob being written.
///
/// Bytes are appended to `<key>.part`; [`commit`](Self::commit) syncs and
/// renames it to `<key>`, [`abort`](Self::abort) deletes it. Dropping the
/// entry without either leaves the partial file for the next
/// [`BlobCache::open`] to clean up.
#[derive(Debug)]
pub struct PartialEntry {
    key: BlobKey,
    partial: PathBuf,
    complete: PathBuf,
    file: File,
    written: u64,
}

impl PartialEntry {
    pub fn key(&self) -> &BlobKey {
        &self.key
    }

    /// Bytes appended so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn append(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await.map_err(|e| ErrorKind::from_io(e, &self.partial))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Sync the partial and promote it to a complete blob.
    pub async fn commit(mut self) -> Result<PathBuf> {
        self.file.flush().await.map_err(|e| ErrorKind::from_io(e, &self.partial))?;
        self.file.sync_all().await.map_err(|e| ErrorKind::from_io(e, &self.partial))?;
        drop(self.file);
        fs::rename(&self.partial, &self.complete).await.map_err(|e| ErrorKind::from_io(e, &self.complete))?;
        tracing::info!(key = %self.key, bytes = self.written, "Blob complete");
        Ok(self.complete)
    }

    /// Discard the partial.
    pub async fn abort(self) -> Result<()> {
        drop(self.file);
        match fs::remove_file(&self.partial).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(ErrorKind::from_io(e, &self.partial).into()),
        }
        tracing::info!(key = %self.key, bytes = self.written, "Partial blob discarded");
        Ok(())
    }
}
