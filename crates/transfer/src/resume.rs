//! Persistence of partial-transfer records, keyed by fingerprint.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::types::ResumeHandle;
use crate::{Fingerprint, TransferError};

/// Stores resume handles so interrupted transfers can continue.
pub trait ResumeStore: Send + Sync {
    /// Returns the handle recorded for `fingerprint`, if any.
    fn get(&self, fingerprint: &Fingerprint) -> Option<ResumeHandle>;

    /// Inserts or replaces the handle for its fingerprint.
    fn put(&self, handle: ResumeHandle) -> Result<(), TransferError>;

    /// Forgets the handle for `fingerprint`.
    fn remove(&self, fingerprint: &Fingerprint) -> Result<(), TransferError>;
}

// ---------------------------------------------------------------------------
// MemoryResumeStore
// ---------------------------------------------------------------------------

/// Process-local store. Survives coordinator restarts within one process.
#[derive(Default)]
pub struct MemoryResumeStore {
    inner: RwLock<HashMap<Fingerprint, ResumeHandle>>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded handles.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResumeStore for MemoryResumeStore {
    fn get(&self, fingerprint: &Fingerprint) -> Option<ResumeHandle> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(fingerprint).cloned()
    }

    fn put(&self, handle: ResumeHandle) -> Result<(), TransferError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(handle.fingerprint.clone(), handle);
        Ok(())
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<(), TransferError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(fingerprint);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileResumeStore
// ---------------------------------------------------------------------------

/// JSON-file backed store. Survives process restarts.
///
/// The whole map is rewritten on every change; entries are small and
/// updates happen once per acknowledged chunk.
pub struct FileResumeStore {
    path: PathBuf,
    inner: Mutex<HashMap<Fingerprint, ResumeHandle>>,
}

impl FileResumeStore {
    /// Opens the store at `path`, loading existing records.
    ///
    /// A missing file starts an empty store. A corrupt file is logged and
    /// replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let path = path.into();
        let map = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Vec<ResumeHandle>>(&content) {
                Ok(handles) => handles
                    .into_iter()
                    .map(|h| (h.fingerprint.clone(), h))
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring corrupt resume store");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), entries = map.len(), "resume store opened");
        Ok(Self {
            path,
            inner: Mutex::new(map),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &HashMap<Fingerprint, ResumeHandle>) -> Result<(), TransferError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut handles: Vec<&ResumeHandle> = map.values().collect();
        handles.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        let json = serde_json::to_string_pretty(&handles)
            .map_err(|e| TransferError::Store(e.to_string()))?;

        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ResumeStore for FileResumeStore {
    fn get(&self, fingerprint: &Fingerprint) -> Option<ResumeHandle> {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(fingerprint).cloned()
    }

    fn put(&self, handle: ResumeHandle) -> Result<(), TransferError> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.insert(handle.fingerprint.clone(), handle);
        self.persist(&map)
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<(), TransferError> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if map.remove(fingerprint).is_some() {
            self.persist(&map)?;
        }
        Ok(())
    }
}
