//! Chunked transfer engine with resume and bounded retry.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chunked::{Chunk, ChunkReader};
use crate::resume::ResumeStore;
use crate::retry::RetrySchedule;
use crate::sink::{BoxFuture, ChunkSink, SinkError};
use crate::types::{ResumeHandle, TransferEvent, TransferHandle, TransferRequest};
use crate::{DEFAULT_CHUNK_SIZE, Fingerprint, TransferError};

/// Capacity of the per-transfer event channel.
const EVENT_BUFFER: usize = 64;

/// Contract consumed by the upload coordinator.
pub trait TransferEngine: Send + Sync {
    /// Looks for a prior incomplete transfer of `fingerprint`.
    fn find_pending_transfer<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
    ) -> BoxFuture<'a, Option<ResumeHandle>>;

    /// Starts (or resumes) a transfer in the background.
    ///
    /// Must be called from within a tokio runtime.
    fn start(&self, request: TransferRequest) -> TransferHandle;
}

/// [`TransferEngine`] that pushes fixed-size chunks into a [`ChunkSink`].
///
/// Transient sink failures are retried according to the [`RetrySchedule`];
/// the retry budget is restored whenever a failed attempt still advanced
/// the acknowledged offset. Rejections fail immediately.
pub struct ChunkedTransferEngine<S: ChunkSink> {
    sink: Arc<S>,
    store: Arc<dyn ResumeStore>,
    schedule: RetrySchedule,
    chunk_size: usize,
}

impl<S: ChunkSink> ChunkedTransferEngine<S> {
    /// Creates an engine with the default retry schedule and chunk size.
    pub fn new(sink: Arc<S>, store: Arc<dyn ResumeStore>) -> Self {
        Self {
            sink,
            store,
            schedule: RetrySchedule::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Replaces the retry schedule.
    pub fn with_retry_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Replaces the chunk size (0 selects the default).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self
    }

    /// The active retry schedule.
    pub fn retry_schedule(&self) -> &RetrySchedule {
        &self.schedule
    }
}

impl<S: ChunkSink> TransferEngine for ChunkedTransferEngine<S> {
    fn find_pending_transfer<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
    ) -> BoxFuture<'a, Option<ResumeHandle>> {
        Box::pin(async move { self.store.get(fingerprint) })
    }

    fn start(&self, request: TransferRequest) -> TransferHandle {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let fingerprint = request.fingerprint.clone();
        let run = Run {
            sink: Arc::clone(&self.sink),
            store: Arc::clone(&self.store),
            schedule: self.schedule.clone(),
            chunk_size: self.chunk_size,
            request,
            tx,
        };
        tokio::spawn(run.execute());
        TransferHandle::new(fingerprint, rx)
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// How a single attempt ended without error.
enum Attempt {
    Done,
    ObserverGone,
}

enum AttemptError {
    Sink(SinkError),
    Fatal(TransferError),
}

impl From<SinkError> for AttemptError {
    fn from(e: SinkError) -> Self {
        Self::Sink(e)
    }
}

impl From<TransferError> for AttemptError {
    fn from(e: TransferError) -> Self {
        Self::Fatal(e)
    }
}

/// State of one background transfer.
struct Run<S: ChunkSink> {
    sink: Arc<S>,
    store: Arc<dyn ResumeStore>,
    schedule: RetrySchedule,
    chunk_size: usize,
    request: TransferRequest,
    tx: mpsc::Sender<TransferEvent>,
}

impl<S: ChunkSink> Run<S> {
    async fn execute(self) {
        let fp = self.request.fingerprint.clone();
        let mut location = self.request.resume.as_ref().map(|h| h.location.clone());
        let mut acked: u64 = self.request.resume.as_ref().map_or(0, |h| h.acked);
        let mut acked_at_last_failure = acked;
        let mut cursor = self.schedule.cursor();
        let mut attempts: u32 = 0;

        debug!(
            fingerprint = %fp,
            file = %self.request.file.name,
            size = self.request.file.size,
            resume = location.is_some(),
            "transfer starting"
        );

        loop {
            attempts = attempts.saturating_add(1);

            let err = match self.attempt(&mut location, &mut acked).await {
                Ok(Attempt::Done) => {
                    if let Err(e) = self.forget().await {
                        warn!(fingerprint = %fp, error = %e, "failed to clear resume record");
                    }
                    info!(fingerprint = %fp, attempts, "transfer succeeded");
                    let _ = self.tx.send(TransferEvent::Succeeded).await;
                    return;
                }
                Ok(Attempt::ObserverGone) => {
                    debug!(fingerprint = %fp, acked, "observer gone, leaving transfer resumable");
                    return;
                }
                Err(AttemptError::Fatal(e)) => {
                    warn!(fingerprint = %fp, error = %e, "transfer failed");
                    let _ = self.tx.send(TransferEvent::Failed(e)).await;
                    return;
                }
                Err(AttemptError::Sink(SinkError::Rejected(reason))) => {
                    warn!(fingerprint = %fp, %reason, "transfer rejected");
                    let _ = self
                        .tx
                        .send(TransferEvent::Failed(TransferError::Rejected(reason)))
                        .await;
                    return;
                }
                Err(AttemptError::Sink(SinkError::Transient(msg))) => msg,
            };

            if acked > acked_at_last_failure {
                cursor.reset();
            }
            acked_at_last_failure = acked;

            let Some(delay) = cursor.next_delay() else {
                warn!(fingerprint = %fp, attempts, error = %err, "transfer exhausted retries");
                let _ = self
                    .tx
                    .send(TransferEvent::Failed(TransferError::RetriesExhausted {
                        attempts,
                        last_error: err,
                    }))
                    .await;
                return;
            };

            warn!(
                fingerprint = %fp,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient transfer failure, retrying"
            );
            let retrying = TransferEvent::Retrying {
                attempt: attempts,
                delay,
                error: err,
            };
            if self.tx.send(retrying).await.is_err() {
                debug!(fingerprint = %fp, "observer gone during backoff");
                return;
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs one attempt: locate or create the remote upload, then send
    /// every remaining chunk.
    async fn attempt(
        &self,
        location: &mut Option<String>,
        acked: &mut u64,
    ) -> Result<Attempt, AttemptError> {
        let fp = &self.request.fingerprint;
        let total = self.request.file.size;

        let mut remote_offset = None;
        if let Some(loc) = location.as_deref() {
            match self.sink.acknowledged_offset(loc).await {
                Ok(offset) => remote_offset = Some(offset),
                Err(SinkError::Rejected(reason)) => {
                    info!(fingerprint = %fp, %reason, "previous transfer no longer resumable, starting over");
                    self.forget().await?;
                    *location = None;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let loc = match (location.clone(), remote_offset) {
            (Some(loc), Some(offset)) => {
                if offset > total {
                    return Err(TransferError::InvalidFile(format!(
                        "remote offset {offset} beyond file size {total}"
                    ))
                    .into());
                }
                *acked = offset;
                loc
            }
            _ => {
                let loc = self.sink.create(total, &self.request.metadata).await?;
                debug!(fingerprint = %fp, location = %loc, "remote upload created");
                self.record(ResumeHandle {
                    fingerprint: fp.clone(),
                    location: loc.clone(),
                    size: total,
                    acked: 0,
                })
                .await?;
                *location = Some(loc.clone());
                *acked = 0;
                loc
            }
        };

        if !self.report(*acked, total).await {
            return Ok(Attempt::ObserverGone);
        }

        let mut reader = open_reader(&self.request, self.chunk_size).await?;
        if reader.size() != total {
            return Err(TransferError::InvalidFile(format!(
                "{} changed size: announced {total} bytes, found {}",
                self.request.file.name,
                reader.size()
            ))
            .into());
        }
        reader.seek_to(*acked)?;

        loop {
            if self.tx.is_closed() {
                return Ok(Attempt::ObserverGone);
            }

            let (r, next) = read_next(reader).await?;
            reader = r;
            let Some(chunk) = next else {
                break;
            };

            let expected_end = chunk.end();
            let new_offset = self.sink.send_chunk(&loc, chunk).await?;
            if new_offset < *acked || new_offset > expected_end {
                return Err(SinkError::Transient(format!(
                    "sink acknowledged offset {new_offset}, expected up to {expected_end}"
                ))
                .into());
            }
            *acked = new_offset;
            if new_offset != expected_end {
                // Partial acceptance: continue from what was acknowledged.
                reader.seek_to(new_offset)?;
            }

            let handle = ResumeHandle {
                fingerprint: fp.clone(),
                location: loc.clone(),
                size: total,
                acked: new_offset,
            };
            if let Err(e) = self.record(handle).await {
                warn!(fingerprint = %fp, error = %e, "failed to record resume offset");
            }

            if !self.report(new_offset, total).await {
                return Ok(Attempt::ObserverGone);
            }
        }

        if *acked != total {
            return Err(TransferError::InvalidFile(format!(
                "{} ended at byte {} of {total}",
                self.request.file.name, *acked
            ))
            .into());
        }
        Ok(Attempt::Done)
    }

    /// Persists `handle` on the blocking pool.
    async fn record(&self, handle: ResumeHandle) -> Result<(), TransferError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.put(handle))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
    }

    /// Drops the resume record of this transfer on the blocking pool.
    async fn forget(&self) -> Result<(), TransferError> {
        let store = Arc::clone(&self.store);
        let fp = self.request.fingerprint.clone();
        tokio::task::spawn_blocking(move || store.remove(&fp))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
    }

    /// Sends a progress event. Returns `false` if nobody is listening.
    async fn report(&self, acked: u64, total: u64) -> bool {
        self.tx
            .send(TransferEvent::Progress { acked, total })
            .await
            .is_ok()
    }
}

async fn open_reader(request: &TransferRequest, chunk_size: usize) -> Result<ChunkReader, TransferError> {
    let source = request.file.source.clone();
    tokio::task::spawn_blocking(move || ChunkReader::open(&source, chunk_size))
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
}

async fn read_next(mut reader: ChunkReader) -> Result<(ChunkReader, Option<Chunk>), TransferError> {
    tokio::task::spawn_blocking(move || -> Result<_, TransferError> {
        let next = reader.next_chunk()?;
        Ok((reader, next))
    })
    .await
    .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
}
