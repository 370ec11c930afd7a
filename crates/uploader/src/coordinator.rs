//! Upload coordinator: a single actor task that owns the session and the
//! transfer slot, and the handle the host talks to.
//!
//! The actor serializes three inputs (host commands, signaling events and
//! events of the active transfer) onto [`CoordinatorState`]. The host
//! observes snapshots through a `watch` channel and receives progress and
//! outcomes as [`CoordinatorEvent`]s.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use clipdrop_protocol::ChannelEvent;
use clipdrop_signaling::{SignalingChannel, SignalingConnector};
use clipdrop_transfer::{
    Fingerprint, MediaFile, TransferEngine, TransferEvent, TransferHandle, TransferRequest,
};

use crate::error::UploadError;
use crate::intake::{self, IntakeReport};
use crate::state::{CoordinatorState, Effect, Job};
use crate::types::{CoordinatorEvent, CoordinatorSnapshot, JobId};

/// Construction-time settings of a coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptions {
    /// Upload endpoint; part of every file fingerprint so resume records
    /// never cross endpoints.
    pub endpoint: String,
}

#[derive(Debug)]
enum Command {
    Activate {
        token: String,
        reply: oneshot::Sender<Result<(), UploadError>>,
    },
    Submit(Job),
    Deactivate(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running upload coordinator.
///
/// Dropping the handle stops the actor; the signaling channel is torn
/// down without a leave and the active transfer is abandoned.
pub struct UploadCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<CoordinatorSnapshot>,
    events: Option<mpsc::UnboundedReceiver<CoordinatorEvent>>,
    next_id: AtomicU64,
    endpoint: String,
}

impl UploadCoordinator {
    /// Spawns the coordinator actor. Must be called within a tokio runtime.
    pub fn spawn(
        connector: Arc<dyn SignalingConnector>,
        engine: Arc<dyn TransferEngine>,
        options: CoordinatorOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(CoordinatorSnapshot::default());

        let actor = Actor {
            connector,
            engine,
            state: CoordinatorState::new(),
            commands: commands_rx,
            events_tx,
            snapshot_tx,
            channel: None,
            signals: None,
            transfer: None,
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            snapshots: snapshot_rx,
            events: Some(events_rx),
            next_id: AtomicU64::new(1),
            endpoint: options.endpoint,
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<CoordinatorEvent>> {
        self.events.take()
    }

    /// Subscribes to snapshots. The receiver sees the latest one on
    /// every change.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.snapshots.clone()
    }

    /// Returns the latest snapshot.
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Joins the signaling channel for `token`.
    ///
    /// Calling it again with the same token is a no-op; a different token
    /// without an intervening [`deactivate`](Self::deactivate) is a
    /// configuration error.
    pub async fn activate(&self, token: &str) -> Result<(), UploadError> {
        if token.is_empty() {
            return Err(UploadError::Configuration(
                "authorization token is empty".into(),
            ));
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Activate {
            token: token.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| UploadError::Closed)?
    }

    /// Submits a file. Never waits for the session or the transfer: the
    /// job starts now or is queued.
    ///
    /// A file outside the allow-list is rejected with no other effect.
    ///
    /// Disk-backed files are fingerprinted here, which reads up to 64 KiB
    /// of the file synchronously. Async hosts submitting many files should
    /// do so from a blocking thread (see `tokio::task::spawn_blocking`).
    pub fn submit(&self, file: MediaFile) -> Result<JobId, UploadError> {
        intake::check_media(&file)?;
        let fingerprint = Fingerprint::derive(&file, &self.endpoint)?;
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(job = %id, fingerprint = %fingerprint, "file accepted");
        self.send(Command::Submit(Job::new(id, file, fingerprint)))?;
        Ok(id)
    }

    /// Submits a batch in order. Rejected files are skipped and reported.
    pub fn submit_many(&self, files: impl IntoIterator<Item = MediaFile>) -> IntakeReport {
        let mut report = IntakeReport::default();
        for file in files {
            let name = file.name.clone();
            match self.submit(file) {
                Ok(id) => report.accepted.push((id, name)),
                Err(e) => {
                    debug!(name = %name, error = %e, "file skipped");
                    report.rejected.push((name, e));
                }
            }
        }
        report
    }

    /// Submits files and directories from disk, walking directories.
    ///
    /// Blocks on file system access like [`submit`](Self::submit).
    pub fn submit_paths(&self, paths: &[PathBuf]) -> Result<IntakeReport, UploadError> {
        let mut report = IntakeReport::default();
        for path in intake::expand_paths(paths)? {
            let result = intake::media_file_from_path(&path).and_then(|file| {
                let name = file.name.clone();
                self.submit(file).map(|id| (id, name))
            });
            match result {
                Ok(accepted) => report.accepted.push(accepted),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "file skipped");
                    report.rejected.push((path.display().to_string(), e));
                }
            }
        }
        Ok(report)
    }

    /// Leaves the signaling channel and abandons all jobs. The active
    /// transfer keeps its resume record.
    pub async fn deactivate(&self) -> Result<(), UploadError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Deactivate(reply))?;
        rx.await.map_err(|_| UploadError::Closed)
    }

    /// Deactivates and stops the actor.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: Command) -> Result<(), UploadError> {
        self.commands.send(command).map_err(|_| UploadError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct ActiveTransfer {
    job: JobId,
    handle: TransferHandle,
}

enum Input {
    Command(Option<Command>),
    Signal(Option<ChannelEvent>),
    Transfer(JobId, Option<TransferEvent>),
}

struct Actor {
    connector: Arc<dyn SignalingConnector>,
    engine: Arc<dyn TransferEngine>,
    state: CoordinatorState,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    snapshot_tx: watch::Sender<CoordinatorSnapshot>,
    channel: Option<Box<dyn SignalingChannel>>,
    signals: Option<mpsc::Receiver<ChannelEvent>>,
    transfer: Option<ActiveTransfer>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let input = tokio::select! {
                command = self.commands.recv() => Input::Command(command),
                event = next_signal(&mut self.signals) => Input::Signal(event),
                (job, event) = next_transfer(&mut self.transfer) => Input::Transfer(job, event),
            };

            let keep_running = match input {
                Input::Command(None) => {
                    debug!("coordinator handle dropped");
                    false
                }
                Input::Command(Some(command)) => self.handle_command(command).await,
                Input::Signal(Some(event)) => {
                    debug!(event = event.name(), "signaling event");
                    self.state.on_signal(event);
                    true
                }
                Input::Signal(None) => {
                    self.signals = None;
                    self.channel = None;
                    self.state.on_signal_closed();
                    true
                }
                Input::Transfer(job, Some(event)) => {
                    self.state.on_transfer(job, event);
                    true
                }
                Input::Transfer(job, None) => {
                    self.transfer = None;
                    self.state.on_transfer_closed(job);
                    true
                }
            };

            self.apply_effects().await;
            self.publish();
            if !keep_running {
                break;
            }
        }
        debug!("coordinator stopped");
    }

    /// Returns `false` when the actor should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Activate { token, reply } => {
                let result = self.activate(token).await;
                if let Err(e) = &result {
                    warn!(error = %e, "activation failed");
                }
                self.publish();
                let _ = reply.send(result);
                true
            }
            Command::Submit(job) => {
                self.state.submit(job);
                true
            }
            Command::Deactivate(reply) => {
                self.deactivate().await;
                self.apply_effects().await;
                self.publish();
                let _ = reply.send(());
                true
            }
            Command::Shutdown(reply) => {
                self.deactivate().await;
                self.apply_effects().await;
                self.publish();
                let _ = reply.send(());
                false
            }
        }
    }

    async fn activate(&mut self, token: String) -> Result<(), UploadError> {
        match self.state.token() {
            Some(current) if current == token => return Ok(()),
            Some(_) => {
                return Err(UploadError::Configuration(
                    "already activated with a different token".into(),
                ));
            }
            None => {}
        }

        let mut channel = self.connector.join(&token).await?;
        self.signals = channel.take_events();
        if self.signals.is_none() {
            warn!("signaling channel has no event stream");
        }
        info!(topic_len = channel.topic().len(), "signaling channel joined");
        self.channel = Some(channel);
        self.state.activated(token);
        Ok(())
    }

    async fn deactivate(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.leave().await;
            info!("left signaling channel");
        }
        self.signals = None;
        self.state.deactivated();
    }

    async fn apply_effects(&mut self) {
        for effect in self.state.take_effects() {
            match effect {
                Effect::Emit(event) => {
                    let _ = self.events_tx.send(event);
                }
                Effect::StartTransfer { job, request } => self.start_transfer(job, request).await,
                Effect::StopTransfer(job) => {
                    if self.transfer.as_ref().is_some_and(|t| t.job == job) {
                        debug!(job = %job, "no longer observing transfer");
                        self.transfer = None;
                    }
                }
            }
        }
    }

    /// Resume probe, then start.
    async fn start_transfer(&mut self, job: JobId, mut request: TransferRequest) {
        let resume = self
            .engine
            .find_pending_transfer(&request.fingerprint)
            .await;
        match &resume {
            Some(handle) => info!(job = %job, offset = handle.acked, "resuming interrupted transfer"),
            None => debug!(job = %job, "no prior transfer, starting at 0"),
        }
        request.resume = resume;
        let handle = self.engine.start(request);
        self.transfer = Some(ActiveTransfer { job, handle });
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn next_signal(signals: &mut Option<mpsc::Receiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_transfer(transfer: &mut Option<ActiveTransfer>) -> (JobId, Option<TransferEvent>) {
    match transfer {
        Some(active) => (active.job, active.handle.recv().await),
        None => std::future::pending().await,
    }
}
