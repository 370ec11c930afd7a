//! Application wiring: signaling connector, tus engine and coordinator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use clipdrop_signaling::WsConnector;
use clipdrop_transfer::{ChunkedTransferEngine, FileResumeStore, TusSink};
use clipdrop_uploader::{
    CoordinatorEvent, IntakeReport, JobId, UploadCoordinator, UploaderConfig,
};

/// Per-file results of one run.
#[derive(Debug, Default)]
pub struct Summary {
    /// `(file, artifact reference)`
    pub completed: Vec<(String, String)>,
    /// `(file, reason)`
    pub failed: Vec<(String, String)>,
    /// Files skipped at intake.
    pub skipped: usize,
    /// Jobs still running when the run was interrupted.
    pub unfinished: usize,
}

impl Summary {
    pub fn all_completed(&self) -> bool {
        !self.completed.is_empty() && self.failed.is_empty() && self.unfinished == 0
    }
}

/// Uploads `paths` and waits for every job's outcome or Ctrl-C.
pub async fn run(
    config: UploaderConfig,
    token: String,
    paths: Vec<PathBuf>,
) -> anyhow::Result<Summary> {
    // -- Collaborators --
    let connector = WsConnector::new(&config.signaling_url)
        .with_topic_prefix(config.topic_prefix.clone())
        .with_reconnect(config.reconnect.to_reconnect_config());

    let sink = TusSink::new(&config.endpoint)?.with_checksums(config.checksums);
    let store_path = config.resume_store_path();
    let store = FileResumeStore::open(&store_path)
        .with_context(|| format!("opening resume store {}", store_path.display()))?;
    let engine = ChunkedTransferEngine::new(Arc::new(sink), Arc::new(store))
        .with_retry_schedule(config.retry_schedule())
        .with_chunk_size(config.chunk_size);

    // -- Coordinator --
    let coordinator = UploadCoordinator::spawn(
        Arc::new(connector),
        Arc::new(engine),
        config.coordinator_options(),
    );
    let (mut coordinator, report) = submit_files(coordinator, paths).await?;
    let mut events = coordinator
        .take_events()
        .context("coordinator events already taken")?;

    let mut summary = Summary::default();
    for (file, e) in &report.rejected {
        tracing::warn!(file = %file, error = %e, "skipping file");
    }
    summary.skipped = report.rejected.len();
    if report.accepted.is_empty() {
        anyhow::bail!("no uploadable video files");
    }
    let mut pending: HashMap<JobId, String> = report.accepted.into_iter().collect();
    tracing::info!(files = pending.len(), "files queued");

    coordinator.activate(&token).await?;
    tracing::info!("signaling channel joined, waiting for session");

    // -- Main loop: one outcome per job --
    while !pending.is_empty() {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, unfinished uploads resume on the next run");
                break;
            }
        };
        let Some(event) = event else {
            tracing::error!("coordinator stopped unexpectedly");
            break;
        };

        match event {
            CoordinatorEvent::Progress { job, percent } => {
                let file = pending.get(&job).map(String::as_str).unwrap_or_default();
                let rate = coordinator
                    .snapshot()
                    .active
                    .filter(|active| active.id == job)
                    .map(|active| describe_rate(active.bytes_per_second, active.eta));
                tracing::info!(
                    file = %file,
                    percent,
                    rate = rate.as_deref().unwrap_or("-"),
                    "progress"
                );
            }
            CoordinatorEvent::Completed { job, artifact_ref } => {
                let file = pending.remove(&job).unwrap_or_default();
                tracing::info!(file = %file, artifact = %artifact_ref, "upload completed");
                summary.completed.push((file, artifact_ref));
            }
            CoordinatorEvent::Failed { job, reason } => {
                let file = pending.remove(&job).unwrap_or_default();
                tracing::error!(file = %file, reason = %reason, "upload failed");
                summary.failed.push((file, reason));
            }
        }
    }

    // -- Graceful shutdown --
    summary.unfinished = pending.len();
    coordinator.shutdown().await;
    Ok(summary)
}

/// Walks and fingerprints `paths` on the blocking pool, then hands the
/// coordinator back.
async fn submit_files(
    coordinator: UploadCoordinator,
    paths: Vec<PathBuf>,
) -> anyhow::Result<(UploadCoordinator, IntakeReport)> {
    let (coordinator, report) = tokio::task::spawn_blocking(move || {
        let report = coordinator.submit_paths(&paths);
        (coordinator, report)
    })
    .await
    .context("intake task failed")?;
    Ok((coordinator, report?))
}

/// Formats throughput and remaining time, e.g. `2.4 MiB/s, eta 12s`.
fn describe_rate(bytes_per_second: f64, eta: Option<Duration>) -> String {
    let rate = if bytes_per_second >= 1024.0 * 1024.0 {
        format!("{:.1} MiB/s", bytes_per_second / (1024.0 * 1024.0))
    } else if bytes_per_second >= 1024.0 {
        format!("{:.1} KiB/s", bytes_per_second / 1024.0)
    } else {
        format!("{bytes_per_second:.0} B/s")
    };
    match eta {
        Some(eta) => format!("{rate}, eta {}s", eta.as_secs()),
        None => rate,
    }
}
