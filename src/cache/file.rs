//! On-disk cache, one file per key.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::{Cache, SavedBinary};
use crate::{Error, Result};

/// Cache stored under a directory.
///
/// File names are the hex SHA-256 of the key, so any key is a safe name.
/// Entries never expire; staleness is handled by the conditional fetch.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.dir.join(name)
    }
}

impl Cache for FileCache {
    fn start(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Cache(format!("create {}: {}", self.dir.display(), e)))
    }

    fn load(&self, key: &str) -> Result<Option<SavedBinary>> {
        let path = self.entry_path(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Cache(format!("read {}: {}", path.display(), e))),
        };
        SavedBinary::unmarshal(&data)
            .map(Some)
            .map_err(|e| Error::Cache(format!("corrupt entry {}: {}", path.display(), e)))
    }

    fn save(&self, key: &str, binary: &SavedBinary) -> Result<()> {
        let path = self.entry_path(key);
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| Error::Cache(format!("create temp file: {}", e)))?;
        file.write_all(&binary.marshal())?;
        file.persist(&path)
            .map_err(|e| Error::Cache(format!("write {}: {}", path.display(), e.error)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_cache() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path().join("cache"));
        cache.start().unwrap();
        assert_eq!(cache.load("file.0.a/b").unwrap(), None);

        let binary = SavedBinary {
            content: vec![1, 2, 3],
            last_updated: 42,
            last_etag: "W/\"x\"".to_string(),
        };
        cache.save("file.0.a/b", &binary).unwrap();
        assert_eq!(cache.load("file.0.a/b").unwrap(), Some(binary.clone()));

        // Survives reopening.
        let reopened = FileCache::new(cache.dir());
        assert_eq!(reopened.load("file.0.a/b").unwrap(), Some(binary));

        let name = cache.entry_path("file.0.a/b");
        assert_eq!(name.file_name().unwrap().len(), 64);
    }

    #[test]
    fn test_corrupt_entry() {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path());
        fs::write(cache.entry_path("k"), b"\x09garbage").unwrap();
        assert!(matches!(cache.load("k"), Err(Error::Cache(_))));
    }
}
