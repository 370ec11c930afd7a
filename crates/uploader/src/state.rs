//! Coordinator state machine.
//!
//! Synchronous and free of I/O: commands and collaborator events go in,
//! [`Effect`]s come out for the actor to carry out. This is the only place
//! that mutates session and job state.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use clipdrop_protocol::ChannelEvent;
use clipdrop_transfer::{
    Fingerprint, MediaFile, SpeedCalculator, TransferError, TransferEvent, TransferMetadata,
    TransferRequest,
};

use crate::types::{
    CoordinatorEvent, CoordinatorSnapshot, CoordinatorStatus, JobId, JobSnapshot, JobStatus,
    UploadOutcome,
};

/// Percent published as soon as a file is accepted.
const ACCEPTED_PERCENT: u8 = 1;

/// Reason used when the signaling channel ends for good.
pub(crate) const SIGNALING_CLOSED: &str = "signaling channel closed";

/// Reason used when a transfer stops without reporting an outcome.
pub(crate) const TRANSFER_ENDED: &str = "transfer ended unexpectedly";

/// Something the actor must do after a state change.
#[derive(Debug)]
pub(crate) enum Effect {
    /// Deliver an event to the host.
    Emit(CoordinatorEvent),
    /// Probe for a resumable transfer, then start this request.
    StartTransfer { job: JobId, request: TransferRequest },
    /// Stop observing the transfer of `job`.
    StopTransfer(JobId),
}

#[derive(Debug)]
pub(crate) struct Job {
    id: JobId,
    file: MediaFile,
    fingerprint: Fingerprint,
    status: JobStatus,
    percent: u8,
    acked: u64,
    total: u64,
    speed: SpeedCalculator,
}

impl Job {
    pub(crate) fn new(id: JobId, file: MediaFile, fingerprint: Fingerprint) -> Self {
        let total = file.size;
        Self {
            id,
            file,
            fingerprint,
            status: JobStatus::Queued,
            percent: 0,
            acked: 0,
            total,
            speed: SpeedCalculator::default(),
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            name: self.file.name.clone(),
            content_type: self.file.content_type.clone(),
            status: self.status,
            percent: self.percent,
            bytes_acked: self.acked,
            bytes_total: self.total,
            bytes_per_second: self.speed.bytes_per_second(),
            eta: match self.status {
                JobStatus::Transferring => self.speed.eta(self.total.saturating_sub(self.acked)),
                _ => None,
            },
        }
    }
}

#[derive(Debug)]
struct Session {
    token: String,
    session_id: Option<String>,
}

/// Session, transfer slot and pending queue.
#[derive(Debug, Default)]
pub(crate) struct CoordinatorState {
    session: Option<Session>,
    /// Job holding the transfer slot, from start until its outcome.
    active: Option<Job>,
    queue: VecDeque<Job>,
    last_outcome: Option<(JobId, UploadOutcome)>,
    effects: Vec<Effect>,
}

impl CoordinatorState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Token of the joined session, if activated.
    pub(crate) fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.token.as_str())
    }

    pub(crate) fn session_id(&self) -> Option<&str> {
        self.session.as_ref()?.session_id.as_deref()
    }

    /// Drains the effects produced since the last call.
    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// The signaling channel for `token` was joined.
    pub(crate) fn activated(&mut self, token: String) {
        debug!("session pending");
        self.session = Some(Session {
            token,
            session_id: None,
        });
        self.last_outcome = None;
    }

    /// Drops the session and every job without reporting outcomes.
    pub(crate) fn deactivated(&mut self) {
        if let Some(job) = self.active.take() {
            info!(job = %job.id, "abandoning active transfer");
            self.effects.push(Effect::StopTransfer(job.id));
        }
        if !self.queue.is_empty() {
            info!(count = self.queue.len(), "dropping queued jobs");
            self.queue.clear();
        }
        self.session = None;
        self.last_outcome = None;
    }

    /// Accepts a job: it is queued and started once the session is ready
    /// and the slot is free.
    pub(crate) fn submit(&mut self, mut job: Job) {
        job.percent = ACCEPTED_PERCENT;
        self.emit(CoordinatorEvent::Progress {
            job: job.id,
            percent: ACCEPTED_PERCENT,
        });
        debug!(job = %job.id, name = %job.file.name, size = job.total, "job queued");
        self.queue.push_back(job);
        self.advance();
    }

    // -----------------------------------------------------------------------
    // Signaling events
    // -----------------------------------------------------------------------

    pub(crate) fn on_signal(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Initiate { session_id } => self.on_initiate(session_id),
            ChannelEvent::Completed { artifact_ref } => self.on_completed(artifact_ref),
            ChannelEvent::Error { message } => self.on_error(message),
        }
    }

    fn on_initiate(&mut self, session_id: String) {
        let Some(session) = self.session.as_mut() else {
            debug!("initiate without a session, ignoring");
            return;
        };
        if session.session_id.is_some() {
            warn!("session already initiated, ignoring");
            return;
        }
        info!(session_id = %session_id, "upload session ready");
        session.session_id = Some(session_id);
        self.advance();
    }

    fn on_completed(&mut self, artifact_ref: String) {
        let processing = self.active.as_ref().is_some_and(|job| {
            matches!(job.status, JobStatus::Transferring | JobStatus::Transferred)
        });
        if !processing {
            warn!(artifact_ref = %artifact_ref, "completed event without an active job, ignoring");
            return;
        }
        self.finish_active(UploadOutcome::Completed { artifact_ref });
    }

    fn on_error(&mut self, message: String) {
        if self.active.is_some() {
            self.finish_active(UploadOutcome::Failed { reason: message });
        } else if let Some(job) = self.queue.pop_front() {
            self.finish(job, UploadOutcome::Failed { reason: message });
        } else {
            warn!(message = %message, "signaling error without a job");
        }
    }

    /// The signaling channel ended for good; every job fails and the
    /// session is dropped.
    pub(crate) fn on_signal_closed(&mut self) {
        if self.session.is_none() {
            return;
        }
        warn!("signaling channel closed, failing pending jobs");
        if let Some(job) = self.active.take() {
            self.effects.push(Effect::StopTransfer(job.id));
            self.finish(job, failed(SIGNALING_CLOSED));
        }
        while let Some(job) = self.queue.pop_front() {
            self.finish(job, failed(SIGNALING_CLOSED));
        }
        self.session = None;
    }

    // -----------------------------------------------------------------------
    // Transfer events
    // -----------------------------------------------------------------------

    pub(crate) fn on_transfer(&mut self, id: JobId, event: TransferEvent) {
        let Some(job) = self.active.as_mut().filter(|job| job.id == id) else {
            debug!(job = %id, "event for inactive transfer, ignoring");
            return;
        };
        if job.status != JobStatus::Transferring {
            debug!(job = %id, status = ?job.status, "transfer event after transfer finished, ignoring");
            return;
        }

        match event {
            TransferEvent::Progress { acked, total } => {
                job.acked = acked;
                job.total = total;
                job.speed.record(acked);
                self.publish_percent(percent_of(acked, total));
            }
            TransferEvent::Retrying {
                attempt,
                delay,
                error,
            } => {
                warn!(job = %id, attempt, delay_ms = delay.as_millis() as u64, %error, "transfer retrying");
            }
            TransferEvent::Succeeded => {
                job.acked = job.total;
                job.status = JobStatus::Transferred;
                info!(job = %id, "bytes transferred, awaiting processing");
                self.effects.push(Effect::StopTransfer(id));
                self.publish_percent(100);
            }
            TransferEvent::Failed(err) => {
                warn!(job = %id, error = %err, "transfer failed");
                self.finish_active(failed(&failure_reason(&err)));
            }
        }
    }

    /// The transfer's event stream ended.
    pub(crate) fn on_transfer_closed(&mut self, id: JobId) {
        let still_running = self
            .active
            .as_ref()
            .is_some_and(|job| job.id == id && job.status == JobStatus::Transferring);
        if still_running {
            self.finish_active(failed(TRANSFER_ENDED));
        }
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    pub(crate) fn status(&self) -> CoordinatorStatus {
        if let Some(job) = &self.active {
            return match job.status {
                JobStatus::Transferred => CoordinatorStatus::Processing,
                _ => CoordinatorStatus::Uploading,
            };
        }
        if !self.queue.is_empty() {
            return CoordinatorStatus::Queued;
        }
        match (&self.last_outcome, &self.session) {
            (Some((_, UploadOutcome::Completed { .. })), _) => CoordinatorStatus::Completed,
            (Some((_, UploadOutcome::Failed { .. })), _) => CoordinatorStatus::Failed,
            (None, None) => CoordinatorStatus::Idle,
            (None, Some(Session { session_id: None, .. })) => CoordinatorStatus::SessionPending,
            (None, Some(_)) => CoordinatorStatus::Ready,
        }
    }

    pub(crate) fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            status: self.status(),
            session_id: self.session_id().map(str::to_owned),
            active: self.active.as_ref().map(Job::snapshot),
            queued: self.queue.iter().map(|job| job.id).collect(),
            last_outcome: self.last_outcome.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn emit(&mut self, event: CoordinatorEvent) {
        self.effects.push(Effect::Emit(event));
    }

    /// Starts the next queued job if the session is ready and the slot free.
    fn advance(&mut self) {
        if self.active.is_some() {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        let Some(session_id) = &session.session_id else {
            return;
        };
        let Some(mut job) = self.queue.pop_front() else {
            return;
        };

        let mut metadata = TransferMetadata::new();
        metadata.insert("title".into(), job.file.name.clone());
        metadata.insert("filetype".into(), job.file.content_type.clone());
        metadata.insert("token".into(), session.token.clone());
        metadata.insert("upload_id".into(), session_id.clone());

        let request = TransferRequest {
            file: job.file.clone(),
            fingerprint: job.fingerprint.clone(),
            metadata,
            resume: None,
        };
        job.status = JobStatus::Transferring;
        info!(job = %job.id, name = %job.file.name, "transfer starting");
        self.effects.push(Effect::StartTransfer {
            job: job.id,
            request,
        });
        self.active = Some(job);
    }

    /// Raises the active job's percent, never lowering it.
    fn publish_percent(&mut self, percent: u8) {
        let Some(job) = self.active.as_mut() else {
            return;
        };
        if percent <= job.percent {
            return;
        }
        job.percent = percent;
        let id = job.id;
        self.emit(CoordinatorEvent::Progress { job: id, percent });
    }

    fn finish_active(&mut self, outcome: UploadOutcome) {
        if let Some(job) = self.active.take() {
            self.effects.push(Effect::StopTransfer(job.id));
            self.finish(job, outcome);
        }
        self.advance();
    }

    /// Reports the single outcome of `job`.
    fn finish(&mut self, mut job: Job, outcome: UploadOutcome) {
        let event = match &outcome {
            UploadOutcome::Completed { artifact_ref } => {
                job.status = JobStatus::Completed;
                info!(job = %job.id, artifact_ref = %artifact_ref, "upload completed");
                CoordinatorEvent::Completed {
                    job: job.id,
                    artifact_ref: artifact_ref.clone(),
                }
            }
            UploadOutcome::Failed { reason } => {
                job.status = JobStatus::Failed;
                warn!(job = %job.id, reason = %reason, "upload failed");
                CoordinatorEvent::Failed {
                    job: job.id,
                    reason: reason.clone(),
                }
            }
        };
        self.emit(event);
        self.last_outcome = Some((job.id, outcome));
    }
}

fn failed(reason: &str) -> UploadOutcome {
    UploadOutcome::Failed {
        reason: reason.to_string(),
    }
}

/// Human-readable reason for a terminal transfer error.
pub(crate) fn failure_reason(err: &TransferError) -> String {
    match err {
        TransferError::RetriesExhausted { .. } => "transfer exhausted retries".to_string(),
        other => other.to_string(),
    }
}

/// `round(acked / total * 100)` clamped to `0..=100`. An empty payload is
/// complete.
pub(crate) fn percent_of(acked: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (acked as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
