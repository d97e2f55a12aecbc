//! Never-throws key/value store for failure diagnostics.
//!
//! Bootstrap breadcrumbs and boundary fault records must survive a restart
//! so the next load can show what went wrong, and writing them must never
//! introduce a new failure. Every operation here is infallible from the
//! caller's perspective: IO and serialization problems are logged and
//! absorbed, and the in-memory view stays authoritative.
//!
//! The file format and atomic write discipline (temp file, then rename)
//! follow the daemon-style persistent registry: a versioned, pretty-printed
//! JSON document a human can `cat`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current state-file schema version.
const STATE_FILE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    entries: BTreeMap<String, Value>,
}

struct StoreInner {
    entries: BTreeMap<String, Value>,
    path: Option<PathBuf>,
}

/// Mutex-guarded key/value store whose operations never fail.
///
/// Writes are last-write-wins. When a backing file is configured, every
/// mutation is persisted atomically; persistence failures are logged and
/// the store keeps serving from memory.
pub struct SafeStore {
    inner: Mutex<StoreInner>,
}

impl SafeStore {
    /// Creates a store with no backing file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: BTreeMap::new(),
                path: None,
            }),
        }
    }

    /// Opens a file-backed store.
    ///
    /// A missing, unreadable or corrupt file is not an error: the store
    /// starts empty (logged at warn) and will overwrite the file on the
    /// next write. Opening never fails.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(entries) => entries,
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "state file unusable; starting empty");
                BTreeMap::new()
            },
        };
        Self {
            inner: Mutex::new(StoreInner {
                entries,
                path: Some(path),
            }),
        }
    }

    /// Stores a serializable value under `key`, replacing any previous
    /// value. A value that fails to serialize is dropped (logged), not
    /// raised.
    pub fn put(&self, key: &str, value: &impl Serialize) {
        match serde_json::to_value(value) {
            Ok(value) => self.put_value(key, value),
            Err(error) => {
                tracing::warn!(key, %error, "value not serializable; entry dropped");
            },
        }
    }

    /// Stores a raw JSON value under `key`.
    pub fn put_value(&self, key: &str, value: Value) {
        let mut inner = self.lock();
        inner.entries.insert(key.to_string(), value);
        Self::persist(&inner);
    }

    /// Returns the value stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().entries.get(key).cloned()
    }

    /// Returns the value stored under `key` deserialized as `T`. A stored
    /// value of the wrong shape yields `None`.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(key, %error, "stored value has unexpected shape");
                None
            },
        }
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key);
        if removed.is_some() {
            Self::persist(&inner);
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        Self::persist(&inner);
    }

    /// All current keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn load(path: &Path) -> Result<BTreeMap<String, Value>, String> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let state: StateFile = serde_json::from_str(&content).map_err(|e| e.to_string())?;
        if state.version != STATE_FILE_VERSION {
            return Err(format!("unsupported state file version {}", state.version));
        }
        Ok(state.entries)
    }

    /// Writes the current entries to the backing file, atomically (temp
    /// file in the same directory, then rename). Failures are logged and
    /// absorbed.
    fn persist(inner: &StoreInner) {
        let Some(path) = inner.path.as_ref() else {
            return;
        };
        let state = StateFile {
            version: STATE_FILE_VERSION,
            entries: inner.entries.clone(),
        };
        let json = match serde_json::to_string_pretty(&state) {
            Ok(json) => json,
            Err(error) => {
                tracing::warn!(%error, "state serialization failed; skipping persist");
                return;
            },
        };
        let tmp = path.with_extension("tmp");
        if let Err(error) = std::fs::write(&tmp, json) {
            tracing::warn!(path = %tmp.display(), %error, "state write failed; keeping memory view");
            return;
        }
        if let Err(error) = std::fs::rename(&tmp, path) {
            tracing::warn!(path = %path.display(), %error, "state rename failed; keeping memory view");
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // The store must keep working even if a holder panicked mid-write.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SafeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SafeStore")
            .field("entries", &inner.entries.len())
            .field("path", &inner.path)
            .finish()
    }
}
