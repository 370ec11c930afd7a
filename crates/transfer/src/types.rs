use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{Fingerprint, TransferError};

/// Where the bytes of a media file live.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Payload already held in memory.
    Memory(Arc<[u8]>),
    /// Payload read lazily from disk, chunk by chunk.
    File(PathBuf),
}

/// A file selected for upload.
#[derive(Debug, Clone)]
pub struct MediaFile {
    /// Display name (no directory components).
    pub name: String,
    /// MIME content type, e.g. `video/mp4`.
    pub content_type: String,
    /// Total payload size in bytes.
    pub size: u64,
    pub source: MediaSource,
}

impl MediaFile {
    /// Creates a media file from an in-memory payload.
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        Self {
            name: name.into(),
            content_type: content_type.into(),
            size: bytes.len() as u64,
            source: MediaSource::Memory(bytes),
        }
    }

    /// Creates a media file backed by a path on disk.
    ///
    /// The file size is read from metadata; the payload is not loaded.
    pub fn from_path(path: &Path, content_type: impl Into<String>) -> Result<Self, TransferError> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(TransferError::InvalidFile(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidFile(format!("no file name: {}", path.display())))?;
        Ok(Self {
            name,
            content_type: content_type.into(),
            size: meta.len(),
            source: MediaSource::File(path.to_path_buf()),
        })
    }
}

/// Key/value metadata attached to a transfer (title, filetype, token, ...).
pub type TransferMetadata = BTreeMap<String, String>;

/// A prior incomplete transfer eligible for continuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeHandle {
    pub fingerprint: Fingerprint,
    /// Remote location of the partial upload, opaque to the engine.
    pub location: String,
    /// Total size the upload was created with.
    pub size: u64,
    /// Last acknowledged offset observed locally. The remote offset is
    /// authoritative; this is informational.
    pub acked: u64,
}

/// Everything the engine needs to run one transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub file: MediaFile,
    pub fingerprint: Fingerprint,
    pub metadata: TransferMetadata,
    /// Set when a resume probe found a prior transfer.
    pub resume: Option<ResumeHandle>,
}

/// Event reported by a running transfer.
#[derive(Debug)]
pub enum TransferEvent {
    /// Bytes acknowledged by the remote side so far.
    Progress { acked: u64, total: u64 },
    /// A transient failure occurred; the engine waits `delay` and retries.
    Retrying {
        attempt: u32,
        delay: std::time::Duration,
        error: String,
    },
    /// All bytes were acknowledged.
    Succeeded,
    /// Terminal failure (retries exhausted, rejected, or local I/O).
    Failed(TransferError),
}

impl TransferEvent {
    /// Returns `true` for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// Observer side of a running transfer.
///
/// Dropping the handle abandons the transfer: the engine notices the
/// closed channel, stops sending, and keeps its resume record so a later
/// transfer of the same fingerprint continues where this one stopped.
#[derive(Debug)]
pub struct TransferHandle {
    fingerprint: Fingerprint,
    events: mpsc::Receiver<TransferEvent>,
}

impl TransferHandle {
    /// Wraps an event receiver.
    pub fn new(fingerprint: Fingerprint, events: mpsc::Receiver<TransferEvent>) -> Self {
        Self {
            fingerprint,
            events,
        }
    }

    /// Fingerprint of the file being transferred.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Receives the next event. Returns `None` once the engine is done.
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }
}
