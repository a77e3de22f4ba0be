//! Durable storage for the client's store token
//!
//! The store token is the only thing that carries the client store across
//! reconnects, so clients keep the latest one the server sent.
//!
//! Storage location: `~/.local/share/ampere/tokens/` (configurable via `Config`)

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};

/// Where a client keeps its store token
pub trait TokenStorage: Send + Sync {
    /// Last saved token, if any
    fn load(&self) -> Result<Option<String>>;

    /// Replace the saved token
    fn save(&self, token: &str) -> Result<()>;

    /// Forget the saved token
    fn clear(&self) -> Result<()>;
}

/// Token kept for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    token: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, token: &str) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Token kept in a file
///
/// Writes go to a temporary file that is renamed over the target, so a
/// crash never leaves a half-written token behind.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// One token file per server URL inside `dir`
    pub fn for_server(dir: &Path, url: &str) -> Self {
        let name: String = url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Self::new(dir.join(format!("{}.token", name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token from {:?}", self.path))?;
        let token = content.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    fn save(&self, token: &str) -> Result<()> {
        atomic_write(&self.path, token.as_bytes())
            .with_context(|| format!("Failed to save token to {:?}", self.path))
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove token file {:?}", self.path))?;
        }
        Ok(())
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
    file.write_all(data)
        .with_context(|| format!("Failed to write to temp file {:?}", temp_path))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file {:?}", temp_path))?;

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load().unwrap(), None);

        storage.save("abc.def").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some("abc.def"));

        storage.clear().unwrap();
        assert_eq!(storage.load().unwrap(), None);
    }

    #[test]
    fn test_file_storage_round_trip() {
        let temp = tempdir().unwrap();
        let storage = FileStorage::new(temp.path().join("nested").join("store.token"));
        assert_eq!(storage.load().unwrap(), None);

        storage.save("first").unwrap();
        storage.save("second").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some("second"));
        assert!(!storage.path().with_extension("tmp").exists());

        // A second handle on the same file sees the token
        let reopened = FileStorage::new(storage.path());
        assert_eq!(reopened.load().unwrap().as_deref(), Some("second"));

        storage.clear().unwrap();
        assert!(!storage.path().exists());
        storage.clear().unwrap();
    }

    #[test]
    fn test_for_server_names() {
        let temp = tempdir().unwrap();
        let a = FileStorage::for_server(temp.path(), "ws://localhost:8765/");
        let b = FileStorage::for_server(temp.path(), "ws://example.com:8765/");
        assert_ne!(a.path(), b.path());
        assert_eq!(
            a.path().file_name().unwrap().to_str().unwrap(),
            "ws___localhost_8765_.token"
        );
    }
}
