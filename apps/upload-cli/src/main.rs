//! clipdrop-upload entry point.

mod app;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use clipdrop_uploader::UploaderConfig;

/// Upload video files to a clipdrop session with resumable transfers.
#[derive(Debug, Parser)]
#[command(name = "clipdrop-upload", version, about)]
struct Cli {
    /// Authorization token of the upload session.
    #[arg(long, env = "CLIPDROP_TOKEN", hide_env_values = true)]
    token: String,

    /// Configuration file (defaults to the platform config path).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Signaling WebSocket URL.
    #[arg(long, value_name = "URL")]
    signaling_url: Option<String>,

    /// tus upload endpoint.
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Send a checksum with every chunk.
    #[arg(long)]
    checksums: bool,

    /// Video files or directories to upload.
    #[arg(required = true, value_name = "FILES")]
    files: Vec<PathBuf>,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut UploaderConfig) {
        if let Some(url) = &self.signaling_url {
            config.signaling_url = url.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if self.checksums {
            config.checksums = true;
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting clipdrop-upload");

    let mut config = UploaderConfig::load_or_default(cli.config.as_deref())?;
    cli.apply(&mut config);
    tracing::info!(endpoint = %config.endpoint, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(app::run(config, cli.token, cli.files))?;

    tracing::info!(
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        unfinished = summary.unfinished,
        "done"
    );
    Ok(if summary.all_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
