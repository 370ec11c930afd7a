//! Resumable chunked transfer with retry/backoff and progress reporting.
//!
//! The [`TransferEngine`] trait is the contract the upload coordinator
//! consumes. [`ChunkedTransferEngine`] implements it on top of any
//! [`ChunkSink`]; [`TusSink`] speaks the tus 1.0.0 HTTP protocol.

mod chunked;
mod engine;
mod fingerprint;
mod progress;
mod resume;
mod retry;
mod sink;
mod tus;
mod types;

pub use chunked::{Chunk, ChunkReader, checksum_bytes};
pub use engine::{ChunkedTransferEngine, TransferEngine};
pub use fingerprint::Fingerprint;
pub use progress::SpeedCalculator;
pub use resume::{FileResumeStore, MemoryResumeStore, ResumeStore};
pub use retry::{DEFAULT_RETRY_DELAYS, RetryCursor, RetrySchedule};
pub use sink::{BoxFuture, ChunkSink, SinkError};
pub use tus::TusSink;
pub use types::{
    MediaFile, MediaSource, ResumeHandle, TransferEvent, TransferHandle, TransferMetadata,
    TransferRequest,
};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer exhausted retries after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("transfer rejected: {0}")]
    Rejected(String),

    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("resume store error: {0}")]
    Store(String),
}

impl TransferError {
    /// Returns `true` if the retry budget was used up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}
