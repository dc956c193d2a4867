use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

pub type CacheRef = Arc<dyn Cache + Sync + Send>;

/// Durable key to blob storage used by the request cache.
///
/// Implementations must publish blobs atomically: a reader either sees the previous blob for a
/// key or the complete new one, never a partial write.
#[allow(clippy::disallowed_methods, clippy::disallowed_types)]
#[mockall::automock]
pub trait Cache {
  fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

  fn set_blob(&self, key: &str, blob: &[u8]) -> anyhow::Result<()>;

  /// Remove a blob. Removing a missing key is not an error.
  fn remove_blob(&self, key: &str) -> anyhow::Result<()>;
}

/// Convert a cache key to a safe filesystem path.
/// Sanitizes `..` in path segments to avoid directory traversal.
pub fn get_file_key(cache_dir: &Path, key: &str) -> PathBuf {
  let clean_key = key
    .split('/')
    .map(|part| {
      if part == ".." {
        "$$__parent_dir$$"
      } else {
        part
      }
    })
    .collect::<Vec<_>>()
    .join("/");
  cache_dir.join(clean_key)
}

/// A filesystem-only cache implementation.
/// Stores all blobs on the filesystem under `{cache_dir}/{key}`.
#[derive(Debug)]
pub struct FsCache {
  cache_dir: PathBuf,
}

impl FsCache {
  pub fn new(cache_dir: PathBuf) -> Self {
    Self { cache_dir }
  }
}

impl Cache for FsCache {
  fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
    let file_path = get_file_key(&self.cache_dir, key);
    match fs::read(&file_path) {
      Ok(blob) => Ok(Some(blob)),
      Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(error) => Err(error.into()),
    }
  }

  #[tracing::instrument(level = "trace", skip(self, blob))]
  fn set_blob(&self, key: &str, blob: &[u8]) -> anyhow::Result<()> {
    let file_path = get_file_key(&self.cache_dir, key);
    let parent = file_path
      .parent()
      .ok_or_else(|| anyhow::anyhow!("Cache key {key} has no parent directory"))?;
    fs::create_dir_all(parent)?;

    // Write next to the destination, then rename into place
    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(blob)?;
    temp_file.as_file().sync_all()?;
    temp_file
      .persist(&file_path)
      .map_err(|error| anyhow::anyhow!("Failed to publish cache entry {key}: {}", error.error))?;

    Ok(())
  }

  fn remove_blob(&self, key: &str) -> anyhow::Result<()> {
    let file_path = get_file_key(&self.cache_dir, key);
    match fs::remove_file(&file_path) {
      Ok(()) => Ok(()),
      Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(error) => Err(error.into()),
    }
  }
}

/// Process-lifetime cache used in tests and when no cache directory is configured
#[derive(Debug, Default)]
pub struct InMemoryCache {
  store: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCache {
  pub fn keys(&self) -> Vec<String> {
    let mut keys = self.store.read().keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
  }
}

impl Cache for InMemoryCache {
  fn get_blob(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
    Ok(self.store.read().get(key).cloned())
  }

  fn set_blob(&self, key: &str, blob: &[u8]) -> anyhow::Result<()> {
    self.store.write().insert(key.to_string(), blob.to_vec());
    Ok(())
  }

  fn remove_blob(&self, key: &str) -> anyhow::Result<()> {
    self.store.write().remove(key);
    Ok(())
  }
}
