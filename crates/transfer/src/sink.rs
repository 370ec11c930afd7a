//! Remote side of a chunked transfer.

use std::future::Future;
use std::pin::Pin;

use crate::chunked::Chunk;
use crate::types::TransferMetadata;

/// Boxed future used by object-safe async traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure reported by a [`ChunkSink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Network trouble, server overload, offset conflict: worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// The remote side refused the request; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Abstract remote endpoint accepting byte ranges of an upload.
///
/// [`TusSink`](crate::TusSink) implements this over HTTP. Using a trait keeps
/// the engine's retry/resume logic decoupled from transport and testable
/// with mocks.
pub trait ChunkSink: Send + Sync + 'static {
    /// Creates a remote upload of `size` bytes and returns its location.
    fn create<'a>(
        &'a self,
        size: u64,
        metadata: &'a TransferMetadata,
    ) -> BoxFuture<'a, Result<String, SinkError>>;

    /// Returns the offset the remote side has acknowledged for `location`.
    fn acknowledged_offset<'a>(&'a self, location: &'a str)
    -> BoxFuture<'a, Result<u64, SinkError>>;

    /// Appends `chunk` at its offset and returns the new acknowledged offset.
    fn send_chunk<'a>(
        &'a self,
        location: &'a str,
        chunk: Chunk,
    ) -> BoxFuture<'a, Result<u64, SinkError>>;
}
