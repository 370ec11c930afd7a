//! Upload coordinator error types.

use clipdrop_signaling::SignalingError;
use clipdrop_transfer::TransferError;

/// Errors returned by the coordinator handle and the configuration layer.
///
/// Upload failures are not errors of this kind: they are reported as
/// [`CoordinatorEvent::Failed`](crate::CoordinatorEvent::Failed).
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to encode config: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("coordinator stopped")]
    Closed,
}
