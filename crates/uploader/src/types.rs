//! Data types observed by the host: job ids, statuses, snapshots and
//! output events.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Identifier of a submitted job, unique per coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a single transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting for the session or for the transfer slot.
    Queued,
    /// Bytes are being sent.
    Transferring,
    /// All bytes acknowledged; waiting for server-side processing.
    Transferred,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Coarse state exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorStatus {
    /// Not activated and nothing submitted.
    #[default]
    Idle,
    /// Channel joined, session id not received yet.
    SessionPending,
    /// Session id known, transfer slot free.
    Ready,
    /// Work is waiting for the session or the slot.
    Queued,
    Uploading,
    /// Bytes transferred, waiting for the server to finish processing.
    Processing,
    /// The last job completed and nothing else is pending.
    Completed,
    /// The last job failed and nothing else is pending.
    Failed,
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    Completed { artifact_ref: String },
    Failed { reason: String },
}

/// Event delivered to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Published percent changed. Never decreases within a job.
    Progress { job: JobId, percent: u8 },
    /// The server finished processing the upload.
    Completed { job: JobId, artifact_ref: String },
    /// The job failed for good.
    Failed { job: JobId, reason: String },
}

impl CoordinatorEvent {
    pub fn job(&self) -> JobId {
        match self {
            Self::Progress { job, .. } | Self::Completed { job, .. } | Self::Failed { job, .. } => {
                *job
            }
        }
    }

    /// Returns the outcome carried by a terminal event.
    pub fn outcome(&self) -> Option<UploadOutcome> {
        match self {
            Self::Progress { .. } => None,
            Self::Completed { artifact_ref, .. } => Some(UploadOutcome::Completed {
                artifact_ref: artifact_ref.clone(),
            }),
            Self::Failed { reason, .. } => Some(UploadOutcome::Failed {
                reason: reason.clone(),
            }),
        }
    }
}

/// Read-only view of the active job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub content_type: String,
    pub status: JobStatus,
    pub percent: u8,
    pub bytes_acked: u64,
    pub bytes_total: u64,
    /// Recent throughput; 0 until two progress samples exist.
    pub bytes_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<Duration>,
}

/// Read-only view of the coordinator, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorSnapshot {
    pub status: CoordinatorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<JobSnapshot>,
    /// Jobs waiting, in start order.
    pub queued: Vec<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<(JobId, UploadOutcome)>,
}

impl CoordinatorSnapshot {
    /// Percent of the active job, if any.
    pub fn percent(&self) -> Option<u8> {
        self.active.as_ref().map(|job| job.percent)
    }

    /// Returns `true` when the session id is known and no job holds the
    /// transfer slot, so a new submission starts right away.
    pub fn is_ready(&self) -> bool {
        self.session_id.is_some() && self.active.is_none() && self.queued.is_empty()
    }
}
