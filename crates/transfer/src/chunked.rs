use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::types::MediaSource;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// A chunk of payload data ready to be sent.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl Chunk {
    /// Offset just past the end of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

enum Source {
    Memory(Arc<[u8]>),
    File(std::fs::File),
}

/// Reads a media source in fixed-size chunks with SHA-256 checksums.
pub struct ChunkReader {
    source: Source,
    chunk_size: usize,
    offset: u64,
    size: u64,
}

impl ChunkReader {
    /// Opens `source` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn open(source: &MediaSource, chunk_size: usize) -> Result<Self, TransferError> {
        let (source, size) = match source {
            MediaSource::Memory(bytes) => (Source::Memory(Arc::clone(bytes)), bytes.len() as u64),
            MediaSource::File(path) => {
                let file = std::fs::File::open(path)?;
                let size = file.metadata()?.len();
                (Source::File(file), size)
            }
        };
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            source,
            chunk_size,
            offset: 0,
            size,
        })
    }

    /// Seeks to the given byte offset (for resume).
    pub fn seek_to(&mut self, offset: u64) -> Result<(), TransferError> {
        if offset > self.size {
            return Err(TransferError::InvalidFile(format!(
                "resume offset {offset} beyond file size {}",
                self.size
            )));
        }
        if let Source::File(file) = &mut self.source {
            file.seek(SeekFrom::Start(offset))?;
        }
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let data = match &mut self.source {
            Source::Memory(bytes) => {
                let start = self.offset as usize;
                bytes[start..start + read_size].to_vec()
            }
            Source::File(file) => {
                let mut buf = vec![0u8; read_size];
                let n = file.read(&mut buf)?;
                if n == 0 {
                    // File shrank underneath us.
                    return Err(TransferError::InvalidFile(format!(
                        "unexpected end of file at offset {}",
                        self.offset
                    )));
                }
                buf.truncate(n);
                buf
            }
        };

        let checksum = checksum_bytes(&data);
        let chunk = Chunk {
            offset: self.offset,
            data,
            checksum,
        };
        self.offset = chunk.end();
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total payload size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }
}
