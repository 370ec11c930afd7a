//! Resumable upload coordinator.
//!
//! Bridges a signaling channel (session id, completion and error
//! notifications) and a resumable transfer engine (byte transfer with
//! retry and resume) into one progress/outcome contract for the host.
//!
//! # Lifecycle
//!
//! 1. **Activate**: join the signaling channel for an authorization token
//! 2. **Submit**: files are checked against the allow-list and queued
//! 3. **Initiate**: the server's session id releases the queue, one job
//!    at a time
//! 4. **Transfer**: resume probe, then chunked upload with retry
//! 5. **Process**: the server reports `completed` (or `error`) for the job

pub mod config;
pub mod coordinator;
pub mod error;
pub mod intake;
mod state;
pub mod types;

pub use config::{ReconnectSettings, UploaderConfig, config_path};
pub use coordinator::{CoordinatorOptions, UploadCoordinator};
pub use error::UploadError;
pub use intake::{
    ALLOWED_CONTENT_TYPES, IntakeReport, content_type_for_path, expand_paths, is_allowed,
    media_file_from_path,
};
pub use types::{
    CoordinatorEvent, CoordinatorSnapshot, CoordinatorStatus, JobId, JobSnapshot, JobStatus,
    UploadOutcome,
};
