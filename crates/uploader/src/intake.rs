//! Intake adapter: content-type policy and file selection.
//!
//! Files reach the coordinator either one by one or as a batch (a drop
//! or a multi-select). Only video types from [`ALLOWED_CONTENT_TYPES`]
//! are accepted.

use std::path::{Path, PathBuf};

use clipdrop_transfer::MediaFile;

use crate::error::UploadError;
use crate::types::JobId;

/// Content types accepted for upload.
pub const ALLOWED_CONTENT_TYPES: [&str; 6] = [
    "video/3gpp",
    "video/mpeg",
    "video/mp4",
    "video/ogg",
    "video/quicktime",
    "video/webm",
];

/// Returns `true` if `content_type` is on the allow-list.
///
/// Matching ignores case, surrounding whitespace and parameters such as
/// `; codecs=...`.
pub fn is_allowed(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES.contains(&essence.as_str())
}

/// Checks `file` against the allow-list.
pub fn check_media(file: &MediaFile) -> Result<(), UploadError> {
    if is_allowed(&file.content_type) {
        Ok(())
    } else {
        Err(UploadError::UnsupportedMedia(file.content_type.clone()))
    }
}

/// Maps a file extension to the content type used for the upload.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("3gp" | "3gpp") => Some("video/3gpp"),
        Some("mpeg" | "mpg" | "mpe") => Some("video/mpeg"),
        Some("mp4" | "m4v") => Some("video/mp4"),
        Some("ogv" | "ogg") => Some("video/ogg"),
        Some("mov" | "qt") => Some("video/quicktime"),
        Some("webm") => Some("video/webm"),
        _ => None,
    }
}

/// Builds a disk-backed [`MediaFile`], deriving the content type from the
/// extension.
pub fn media_file_from_path(path: &Path) -> Result<MediaFile, UploadError> {
    let content_type = content_type_for_path(path).ok_or_else(|| {
        UploadError::UnsupportedMedia(format!("unknown file type: {}", path.display()))
    })?;
    Ok(MediaFile::from_path(path, content_type)?)
}

/// Expands the given paths into a flat file list.
///
/// Directories are walked recursively and their entries sorted by path so
/// batches start in a stable order. Plain files are kept as given.
pub fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>, UploadError> {
    let mut files = Vec::new();
    for path in paths {
        if std::fs::metadata(path)?.is_dir() {
            let mut found = Vec::new();
            walk_dir(path, &mut found)?;
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn walk_dir(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), UploadError> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(&path, files)?;
        } else if metadata.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Result of submitting a batch of files.
#[derive(Debug, Default)]
pub struct IntakeReport {
    /// Accepted files, in submission order.
    pub accepted: Vec<(JobId, String)>,
    /// Skipped files with the reason.
    pub rejected: Vec<(String, UploadError)>,
}

impl IntakeReport {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}
