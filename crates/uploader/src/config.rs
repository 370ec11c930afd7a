//! Uploader configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/clipdrop/uploader.toml`
//! - Windows: `%APPDATA%/clipdrop/uploader.toml`
//!
//! Every field has a default, so a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use clipdrop_protocol::constants::DEFAULT_TOPIC_PREFIX;
use clipdrop_signaling::ReconnectConfig;
use clipdrop_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_RETRY_DELAYS, RetrySchedule};

use crate::coordinator::CoordinatorOptions;
use crate::error::UploadError;

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// WebSocket URL of the signaling socket.
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,

    /// Prefix joined with the authorization token to form the topic.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// tus upload endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bytes per PATCH request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Waits before successive retries of a failed transfer, in
    /// milliseconds.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,

    /// Send `Upload-Checksum` with every chunk.
    #[serde(default)]
    pub checksums: bool,

    /// Resume record file. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_store: Option<PathBuf>,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

/// Signaling reconnection backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Attempts before giving up; 0 retries until deactivated.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_signaling_url() -> String {
    "ws://localhost:4000/socket/websocket".into()
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.into()
}

fn default_endpoint() -> String {
    "http://localhost:1080/files/".into()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_retry_delays() -> Vec<u64> {
    DEFAULT_RETRY_DELAYS.to_vec()
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectSettings {
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            ..ReconnectConfig::default()
        }
    }
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            topic_prefix: default_topic_prefix(),
            endpoint: default_endpoint(),
            chunk_size: default_chunk_size(),
            retry_delays_ms: default_retry_delays(),
            checksums: false,
            resume_store: None,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl UploaderConfig {
    /// Loads configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        let content = std::fs::read_to_string(path)?;
        let config: UploaderConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Loads configuration from `path` (or the platform path), falling back
    /// to defaults when the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, UploadError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<(), UploadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule::from_millis(&self.retry_delays_ms)
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            endpoint: self.endpoint.clone(),
        }
    }

    /// Resume record file, explicit or platform default.
    pub fn resume_store_path(&self) -> PathBuf {
        self.resume_store.clone().unwrap_or_else(default_resume_store)
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("clipdrop").join("uploader.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("clipdrop")
            .join("uploader.toml")
    }
}

fn default_resume_store() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let local =
            std::env::var("LOCALAPPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(local).join("clipdrop").join("resume.json")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("clipdrop")
            .join("resume.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = UploaderConfig::default();
        assert_eq!(config.topic_prefix, "upload:");
        assert_eq!(config.chunk_size, 4 * 1024 * 1024);
        assert_eq!(config.retry_delays_ms, vec![0, 3000, 5000, 10000, 20000, 60000, 60000]);
        assert!(!config.checksums);
        assert!(config.resume_store.is_none());
        assert_eq!(config.reconnect.max_attempts, 10);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = UploaderConfig {
            signaling_url: "wss://media.example/socket/websocket".into(),
            endpoint: "https://media.example/files/".into(),
            chunk_size: 1024,
            retry_delays_ms: vec![0, 100],
            checksums: true,
            resume_store: Some(PathBuf::from("/var/lib/clipdrop/resume.json")),
            ..UploaderConfig::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: UploaderConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            endpoint = "https://media.example/files/"

            [reconnect]
            max_attempts = 0
        "#;
        let config: UploaderConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint, "https://media.example/files/");
        assert_eq!(config.signaling_url, default_signaling_url());
        assert_eq!(config.reconnect.initial_delay_ms, 500);
        assert_eq!(config.reconnect.max_attempts, 0);
    }

    #[test]
    fn reconnect_zero_attempts_means_unbounded() {
        let settings = ReconnectSettings {
            max_attempts: 0,
            ..ReconnectSettings::default()
        };
        let reconnect = settings.to_reconnect_config();
        assert_eq!(reconnect.max_attempts, None);
        assert_eq!(reconnect.initial_delay, Duration::from_millis(500));

        let bounded = ReconnectSettings::default().to_reconnect_config();
        assert_eq!(bounded.max_attempts, Some(10));
        assert_eq!(bounded.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn retry_schedule_from_millis() {
        let config = UploaderConfig {
            retry_delays_ms: vec![0, 250],
            ..UploaderConfig::default()
        };
        let schedule = config.retry_schedule();
        assert_eq!(
            schedule.delays(),
            &[Duration::ZERO, Duration::from_millis(250)]
        );
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("uploader.toml");

        let config = UploaderConfig {
            endpoint: "https://save.test/files/".into(),
            ..UploaderConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = UploaderConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn load_or_default_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = UploaderConfig::load_or_default(Some(&tmp.path().join("none.toml"))).unwrap();
        assert_eq!(config, UploaderConfig::default());
    }

    #[test]
    fn load_rejects_invalid_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "chunk_size = \"big\"").unwrap();
        assert!(matches!(
            UploaderConfig::load(&path),
            Err(UploadError::ConfigParse(_))
        ));
    }

    #[test]
    fn resume_store_path_prefers_explicit() {
        let config = UploaderConfig {
            resume_store: Some(PathBuf::from("/tmp/r.json")),
            ..UploaderConfig::default()
        };
        assert_eq!(config.resume_store_path(), PathBuf::from("/tmp/r.json"));
        assert!(
            UploaderConfig::default()
                .resume_store_path()
                .to_string_lossy()
                .contains("clipdrop")
        );
    }

    #[test]
    fn config_path_not_empty() {
        assert!(config_path().to_string_lossy().contains("clipdrop"));
    }
}
