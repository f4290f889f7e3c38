//! Token Store — durable persistence for the current session's token set.
//!
//! One JSON record at a configured path. Writes go through a temp file and
//! an atomic rename so a reader never observes a half-written record. Multi-
//! process consistency beyond that single-record atomicity is out of scope.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::auth::tokens::TokenSet;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("token store record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Persistence contract consumed by the session manager. Read at
/// initialization, written by login, cleared by logout.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<TokenSet>, StoreError>;
    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// File-backed store holding the single token-set record.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<TokenSet>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tokens = serde_json::from_str(&raw)?;
        Ok(Some(tokens))
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                std::fs::create_dir_all(dir)?;
                dir.to_path_buf()
            }
            _ => PathBuf::from("."),
        };

        // Write-then-rename keeps the record atomic for any concurrent reader.
        let tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&tmp, tokens)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!("Token set persisted to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Ephemeral store for tests: same contract, no filesystem.
#[cfg(test)]
pub struct MemoryTokenStore {
    tokens: std::sync::Mutex<Option<TokenSet>>,
}

#[cfg(test)]
impl MemoryTokenStore {
    pub fn new(initial: Option<TokenSet>) -> Self {
        Self {
            tokens: std::sync::Mutex::new(initial),
        }
    }
}

#[cfg(test)]
impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenSet>, StoreError> {
        Ok(self.tokens.lock().unwrap().clone())
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), StoreError> {
        *self.tokens.lock().unwrap() = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.tokens.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_tokens() -> TokenSet {
        TokenSet {
            access_token: "access".into(),
            id_token: "id".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_clear_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("tokens.json"));

        store.save(&sample_tokens()).unwrap();
        let loaded = store.load().unwrap().expect("record should exist");
        assert_eq!(loaded.access_token, "access");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is a no-op, not an error.
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_record_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileTokenStore::new(path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }
}
