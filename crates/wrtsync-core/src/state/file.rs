// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Purpose
//
// Keeps the presence map and the period accumulators across daemon restarts
// and crashes. Each key is stored as its own JSON document under one
// directory, so a corrupt counter file never costs the presence history.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good document
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// `<dir>/<key>.json`:
//
// ```json
// {
//   "version": "1.0",
//   "data": {
//     "AA:BB:CC:DD:EE:FF": { "last_seen": "2025-01-09T12:00:00Z", "hostname": "laptop" }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::StateStore;

/// State file format version
/// Used for future migration if format changes
const STATE_FILE_VERSION: &str = "1.0";

/// File-based state store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use wrtsync_core::state::FileStateStore;
/// use wrtsync_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/wrtsync").await?;
///
///     store.save("home_last_seen", &serde_json::json!({})).await?;
///     let doc = store.load("home_last_seen").await?;
///     assert!(doc.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    state: Arc<RwLock<FileState>>,
}

/// Internal state for file-based store
#[derive(Debug, Default)]
struct FileState {
    documents: HashMap<String, serde_json::Value>,
    /// Keys whose last write failed; retried on flush
    dirty: HashSet<String>,
}

/// Serializable state file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    data: serde_json::Value,
}

impl FileStateStore {
    /// Open a file state store rooted at `dir`, creating it if needed
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();

        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(&dir).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create state directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            dir,
            state: Arc::new(RwLock::new(FileState::default())),
        })
    }

    /// Directory holding the state files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `key`
    fn path_for(&self, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty()
            || key.starts_with('.')
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(Error::state_store(format!("Invalid state key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    /// Load a document with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main state file
    /// 2. If it does not parse, try loading backup
    /// 3. If backup also fails, report nothing stored
    async fn load_with_recovery(path: &Path) -> Result<Option<serde_json::Value>, Error> {
        match Self::load_document(path).await {
            Ok(doc) => Ok(doc),
            Err(LoadError::Io(e)) => Err(e),
            Err(LoadError::Corrupt(e)) => {
                tracing::warn!(
                    "State file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty state.");
                    return Ok(None);
                }

                match Self::load_document(&backup_path).await {
                    Ok(doc) => {
                        tracing::info!("Recovered state from backup {}", backup_path.display());
                        if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await
                        {
                            tracing::error!(
                                "Failed to restore state file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(doc)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unusable: {}. Starting with empty state.",
                            backup_err
                        );
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Load a document from file
    async fn load_document(path: &Path) -> Result<Option<serde_json::Value>, LoadError> {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            )))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadError::Corrupt(Error::state_store(format!(
                "Failed to parse state file {}: {}",
                path.display(),
                e
            )))
        })?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        Ok(Some(state_file.data))
    }

    /// Write one document atomically
    async fn write_document(&self, path: &Path, value: &serde_json::Value) -> Result<(), Error> {
        let state_file = StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            data: value.clone(),
        };

        let json = serde_json::to_string_pretty(&state_file)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        if !self.dir.as_os_str().is_empty() && !self.dir.exists() {
            fs::create_dir_all(&self.dir).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create state directory {}: {}",
                    self.dir.display(),
                    e
                ))
            })?;
        }

        let temp_path = Self::temp_path(path);
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Keep the previous good document around
        if path.exists() {
            let backup_path = Self::backup_path(path);
            if let Err(e) = fs::copy(path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::trace!("State written to file: {}", path.display());
        Ok(())
    }

    /// Restore state file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored state file from backup");
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut temp = path.to_path_buf();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

/// Distinguishes unreadable files from unparsable ones
enum LoadError {
    Io(Error),
    Corrupt(Error),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) | LoadError::Corrupt(e) => write!(f, "{}", e),
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, Error> {
        let path = self.path_for(key)?;

        if let Some(doc) = self.state.read().await.documents.get(key) {
            return Ok(Some(doc.clone()));
        }

        let doc = Self::load_with_recovery(&path).await?;
        if let Some(doc) = &doc {
            self.state
                .write()
                .await
                .documents
                .insert(key.to_string(), doc.clone());
        }
        Ok(doc)
    }

    async fn save(&self, key: &str, value: &serde_json::Value) -> Result<(), Error> {
        let path = self.path_for(key)?;
        {
            let mut guard = self.state.write().await;
            guard.documents.insert(key.to_string(), value.clone());
            guard.dirty.insert(key.to_string());
        }

        // Immediate write for durability
        self.write_document(&path, value).await?;
        self.state.write().await.dirty.remove(key);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let pending: Vec<(String, serde_json::Value)> = {
            let guard = self.state.read().await;
            guard
                .dirty
                .iter()
                .filter_map(|key| guard.documents.get(key).map(|v| (key.clone(), v.clone())))
                .collect()
        };

        for (key, value) in pending {
            let path = self.path_for(&key)?;
            self.write_document(&path, &value).await?;
            self.state.write().await.dirty.remove(&key);
        }
        Ok(())
    }
}
