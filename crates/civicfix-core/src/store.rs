//! Local key-value persistence: the session flag and the capped report history.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::SavedReport;

pub const SESSION_KEY: &str = "civic_fix_session";
pub const HISTORY_KEY: &str = "civic_fix_history";
const SESSION_ACTIVE: &str = "active";

/// Most recent reports kept in history.
pub const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid storage key \"{0}\"")]
    InvalidKey(String),
}

/// String-keyed persistence boundary. Values are whole documents; every
/// write replaces the previous value.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// --- File-backed store ---

/// One file per key inside a directory (`<dir>/<key>.json`).
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at [`crate::data_dir`].
    pub fn open_default() -> Self {
        Self::new(crate::data_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Temp file + rename so a reader never sees a half-written value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// --- In-memory store ---

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

// --- Session flag ---

pub fn is_logged_in(store: &dyn KeyValueStore) -> bool {
    match store.get(SESSION_KEY) {
        Ok(v) => v.as_deref() == Some(SESSION_ACTIVE),
        Err(e) => {
            tracing::warn!(error = %e, "could not read session flag");
            false
        }
    }
}

pub fn set_logged_in(store: &dyn KeyValueStore, active: bool) -> Result<(), StoreError> {
    if active {
        store.set(SESSION_KEY, SESSION_ACTIVE)
    } else {
        store.remove(SESSION_KEY)
    }
}

// --- History ---

/// Newest-first report history, read once on open and rewritten in full on
/// every change.
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    reports: Vec<SavedReport>,
}

impl HistoryStore {
    /// Load history; unreadable or corrupt data starts an empty history.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let reports = match store.get(HISTORY_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<Vec<SavedReport>>(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "discarding corrupt report history");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read report history");
                Vec::new()
            }
        };
        let mut history = Self { store, reports };
        history.reports.truncate(HISTORY_LIMIT);
        history
    }

    pub fn entries(&self) -> &[SavedReport] {
        &self.reports
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SavedReport> {
        self.reports.iter().find(|r| r.id == id)
    }

    pub fn latest(&self) -> Option<&SavedReport> {
        self.reports.first()
    }

    /// Prepend a report, evicting the oldest past [`HISTORY_LIMIT`]. The
    /// in-memory list is updated even when persisting fails.
    pub fn push(&mut self, report: SavedReport) -> Result<(), StoreError> {
        self.reports.insert(0, report);
        self.reports.truncate(HISTORY_LIMIT);
        self.persist()
    }

    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.reports.clear();
        self.persist()
    }

    fn persist(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string(&self.reports)?;
        self.store.set(HISTORY_KEY, &json)
    }
}
