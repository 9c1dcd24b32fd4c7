//! Durable storage of serialized engine state.
//!
//! A checkpoint is a whole blob keyed by `(environment, session)`. Stores
//! only ever replace a blob as a unit; a failed write leaves the previous
//! blob intact.

use crate::error::CheckpointError;
use crowdplay_env::SessionId;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Storage key of one checkpoint.
///
/// Derived from the environment name and the session identity so that the
/// same channel playing two games keeps two independent saves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey(String);

impl CheckpointKey {
    pub fn new(environment: &str, session: SessionId) -> Self {
        Self(format!("{}.{}", environment.to_lowercase(), session))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for checkpoint storage
///
/// Implementations must be thread-safe; every session task shares one store.
pub trait CheckpointStore: Send + Sync {
    /// Replaces the blob stored under `key`.
    fn save(&self, key: &CheckpointKey, blob: &[u8]) -> Result<(), CheckpointError>;

    /// Returns the blob stored under `key`.
    fn load(&self, key: &CheckpointKey) -> Result<Vec<u8>, CheckpointError>;

    /// Returns true if a blob is stored under `key`.
    fn exists(&self, key: &CheckpointKey) -> bool;
}

// ============================================================================
// FILE STORE
// ============================================================================

/// One file per checkpoint inside a directory.
///
/// Writes go to a temp file in the same directory, are fsynced, and are
/// then persisted over the target with a rename.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Opens (and creates if needed) a checkpoint directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(format!("{}.sav", key.as_str()))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, key: &CheckpointKey, blob: &[u8]) -> Result<(), CheckpointError> {
        let final_path = self.path_for(key);

        // O_EXCL + random name; the temp file is removed on drop if any step fails
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        temp.as_file_mut().write_all(blob)?;
        temp.as_file().sync_all()?;
        temp.persist(&final_path).map_err(|e| e.error)?;
        Ok(())
    }

    fn load(&self, key: &CheckpointKey) -> Result<Vec<u8>, CheckpointError> {
        match std::fs::read(self.path_for(key)) {
            Ok(blob) => Ok(blob),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CheckpointError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &CheckpointKey) -> bool {
        self.path_for(key).is_file()
    }
}

// ============================================================================
// SLED STORE
// ============================================================================

/// Sled-based checkpoint store
///
/// Uses an embedded key-value database; a single-key insert is atomic.
pub struct SledCheckpointStore {
    db: sled::Db,
}

impl SledCheckpointStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let db = sled::open(path)
            .map_err(|e| CheckpointError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store (for testing)
    pub fn open_temp() -> Result<Self, CheckpointError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| CheckpointError::Storage(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl CheckpointStore for SledCheckpointStore {
    fn save(&self, key: &CheckpointKey, blob: &[u8]) -> Result<(), CheckpointError> {
        self.db
            .insert(key.as_str().as_bytes(), blob)
            .map_err(|e| CheckpointError::Storage(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| CheckpointError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn load(&self, key: &CheckpointKey) -> Result<Vec<u8>, CheckpointError> {
        self.db
            .get(key.as_str().as_bytes())
            .map_err(|e| CheckpointError::Storage(format!("Get failed: {}", e)))?
            .map(|value| value.to_vec())
            .ok_or_else(|| CheckpointError::NotFound(key.to_string()))
    }

    fn exists(&self, key: &CheckpointKey) -> bool {
        self.db.contains_key(key.as_str().as_bytes()).unwrap_or(false)
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// In-process store for tests and the simulation harness.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    blobs: Mutex<HashMap<CheckpointKey, Vec<u8>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints.
    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, key: &CheckpointKey, blob: &[u8]) -> Result<(), CheckpointError> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| CheckpointError::Storage("checkpoint map poisoned".into()))?;
        blobs.insert(key.clone(), blob.to_vec());
        Ok(())
    }

    fn load(&self, key: &CheckpointKey) -> Result<Vec<u8>, CheckpointError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| CheckpointError::Storage("checkpoint map poisoned".into()))?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(key.to_string()))
    }

    fn exists(&self, key: &CheckpointKey) -> bool {
        self.blobs
            .lock()
            .map(|b| b.contains_key(key))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn CheckpointStore) {
        let key = CheckpointKey::new("tetris", SessionId(7));
        assert!(!store.exists(&key));
        assert!(matches!(store.load(&key), Err(CheckpointError::NotFound(_))));

        store.save(&key, b"first").unwrap();
        assert!(store.exists(&key));
        assert_eq!(store.load(&key).unwrap(), b"first");

        store.save(&key, b"second, longer blob").unwrap();
        assert_eq!(store.load(&key).unwrap(), b"second, longer blob");
    }

    #[test]
    fn test_key_separates_environments() {
        let red = CheckpointKey::new("pkm_red", SessionId(1));
        let blue = CheckpointKey::new("pkm_blue", SessionId(1));
        assert_ne!(red, blue);
        assert_eq!(red.as_str(), "pkm_red.1");
        assert_eq!(CheckpointKey::new("PKM_RED", SessionId(1)), red);
    }

    #[test]
    fn test_key_has_no_concatenation_collisions() {
        // "a1" + "23" vs "a12" + "3"
        assert_ne!(
            CheckpointKey::new("a1", SessionId(23)),
            CheckpointKey::new("a12", SessionId(3))
        );
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryCheckpointStore::new());
    }

    #[test]
    fn test_sled_store() {
        exercise(&SledCheckpointStore::open_temp().unwrap());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileCheckpointStore::open(dir.path().join("saves")).unwrap());
    }

    #[test]
    fn test_file_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        let key = CheckpointKey::new("tetris", SessionId(9));
        store.save(&key, b"blob").unwrap();
        store.save(&key, b"blob2").unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["tetris.9.sav".to_string()]);
    }

    #[test]
    fn test_file_store_failed_replace_cleans_up_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        let key = CheckpointKey::new("tetris", SessionId(3));

        // A directory occupying the target makes the final rename fail
        let squatter = dir.path().join("tetris.3.sav");
        std::fs::create_dir_all(squatter.join("inner")).unwrap();

        assert!(matches!(store.save(&key, b"blob"), Err(CheckpointError::Io(_))));

        // Only the squatter is left; the temp file went with the error
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(squatter.join("inner").is_dir());
    }
}
