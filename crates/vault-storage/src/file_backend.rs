//! Filesystem backend with crash-safe writes.
//!
//! Each key maps to one file under the backend's root directory. Writes go
//! to a temp file in the same directory first and are renamed into place, so
//! a record file is never observable in a partially written state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::backend::StorageBackend;
use crate::error::{Result, StorageError};

const FILE_EXTENSION: &str = "sav";

/// Storage backend keeping one file per key under a root directory.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Creates a backend rooted at `root`. The directory is created lazily
    /// on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, FILE_EXTENSION))
    }

    fn io_err(path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Writes data to a file atomically: temp file in the same directory,
    /// then rename onto the target path.
    fn atomic_write(&self, path: &Path, data: &str) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(|e| Self::io_err(&self.root, e))?;
        }

        let mut temp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| Self::io_err(path, e))?;
        temp.write_all(data.as_bytes())
            .map_err(|e| Self::io_err(path, e))?;
        temp.flush().map_err(|e| Self::io_err(path, e))?;
        temp.persist(path).map_err(|e| Self::io_err(path, e.error))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        match fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key);
        self.atomic_write(&path, value)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| Self::io_err(&self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_err(&self.root, e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == FILE_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        Ok(keys)
    }
}
