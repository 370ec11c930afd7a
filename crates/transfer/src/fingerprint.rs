use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{MediaFile, MediaSource};
use crate::TransferError;

/// Number of leading payload bytes mixed into a fingerprint.
const SAMPLE_SIZE: usize = 64 * 1024;

/// Stable identity of a file payload, used to find interrupted transfers.
///
/// Derived from the file's name, content type, size, the upload endpoint
/// and a sample of the leading payload bytes. Hashing the whole payload
/// would make intake proportional to file size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derives the fingerprint of `file` for uploads to `endpoint`.
    pub fn derive(file: &MediaFile, endpoint: &str) -> Result<Self, TransferError> {
        let mut hasher = Sha256::new();
        for part in [file.name.as_str(), file.content_type.as_str(), endpoint] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        hasher.update(file.size.to_be_bytes());

        match &file.source {
            MediaSource::Memory(bytes) => {
                let n = bytes.len().min(SAMPLE_SIZE);
                hasher.update(&bytes[..n]);
            }
            MediaSource::File(path) => {
                let file = std::fs::File::open(path)?;
                let mut sample = Vec::with_capacity(SAMPLE_SIZE);
                file.take(SAMPLE_SIZE as u64).read_to_end(&mut sample)?;
                hasher.update(&sample);
            }
        }

        Ok(Self(format!("sha256-{}", hex::encode(hasher.finalize()))))
    }

    /// Wraps a previously stored fingerprint string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
