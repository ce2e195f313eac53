//! Configuration management for ekyc-session
//!
//! Provides configuration loading, saving, and validation for signaling
//! timeouts, media constraints, capture policy, upload endpoints and the
//! reference storage server.

use crate::errors::SessionError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub signaling: SignalingConfig,
    pub media: MediaConfig,
    pub capture: CaptureConfig,
    pub upload: UploadConfig,
    pub server: ServerConfig,
}

/// Rendezvous registration and call negotiation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Registration timeout in milliseconds
    pub registration_timeout_ms: u64,
    /// Time to wait for the remote side to answer, in milliseconds
    pub negotiation_timeout_ms: u64,
    /// Let the rendezvous service assign an id to applicants that have none
    pub assign_applicant_ids: bool,
}

/// Local media acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub video: bool,
    pub audio: bool,
    /// Preferred capture width in pixels
    pub width: u32,
    /// Preferred capture height in pixels
    pub height: u32,
    /// Encoded chunks buffered per stream before slow readers lag
    pub chunk_buffer: usize,
}

/// Which bound stream a capture mode reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    Local,
    Remote,
}

/// What happens to an active recording when its call ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownPolicy {
    /// Keep recording until stopped explicitly
    Continue,
    /// Stop and drop the buffered chunks
    Discard,
    /// Stop and upload what was recorded
    Finalize,
}

/// Capture pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Mime type of finalized recordings
    pub recording_mime: String,
    /// Stream the recorder reads its chunks from
    pub recording_source: CaptureSource,
    /// Stream the screenshot mode reads its frame from
    pub screenshot_source: CaptureSource,
    pub teardown_policy: TeardownPolicy,
}

/// Storage endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub base_url: String,
    pub recording_path: String,
    pub screenshot_path: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

/// Reference storage server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub storage_dir: String,
    /// Prefix prepended to every stored object key
    pub key_prefix: String,
    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            registration_timeout_ms: 10_000,
            negotiation_timeout_ms: 30_000,
            assign_applicant_ids: false,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            width: 1280,
            height: 720,
            chunk_buffer: 256,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            recording_mime: "video/webm".to_string(),
            recording_source: CaptureSource::Remote,
            screenshot_source: CaptureSource::Remote,
            teardown_policy: TeardownPolicy::Finalize,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            recording_path: "/api/upload".to_string(),
            screenshot_path: "/api/upload-screenshot".to_string(),
            timeout_ms: 120_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            storage_dir: "./uploads".to_string(),
            key_prefix: "ekyc/development".to_string(),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

impl UploadConfig {
    pub fn recording_url(&self) -> String {
        join_url(&self.base_url, &self.recording_path)
    }

    pub fn screenshot_url(&self) -> String {
        join_url(&self.base_url, &self.screenshot_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl SessionConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("Failed to read config file: {}", e)))?;

        let config: SessionConfig = toml::from_str(&contents)
            .map_err(|e| SessionError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SessionError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SessionError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| SessionError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| SessionError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("ekyc-session.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.signaling.registration_timeout_ms == 0 {
            return Err(SessionError::Config(
                "Registration timeout must be positive".to_string(),
            ));
        }
        if self.signaling.negotiation_timeout_ms == 0 {
            return Err(SessionError::Config(
                "Negotiation timeout must be positive".to_string(),
            ));
        }

        if !self.media.video && !self.media.audio {
            return Err(SessionError::Config(
                "At least one of video or audio must be enabled".to_string(),
            ));
        }
        if self.media.width == 0 || self.media.height == 0 {
            return Err(SessionError::Config("Invalid media resolution".to_string()));
        }
        if self.media.chunk_buffer == 0 {
            return Err(SessionError::Config(
                "Chunk buffer must hold at least one chunk".to_string(),
            ));
        }

        if self.capture.recording_mime.trim().is_empty() {
            return Err(SessionError::Config(
                "Recording mime type must not be empty".to_string(),
            ));
        }

        if !self.upload.base_url.starts_with("http://")
            && !self.upload.base_url.starts_with("https://")
        {
            return Err(SessionError::Config(format!(
                "Upload base URL must be http(s): {}",
                self.upload.base_url
            )));
        }
        if self.upload.recording_path == self.upload.screenshot_path {
            return Err(SessionError::Config(
                "Recording and screenshot endpoints must be distinct".to_string(),
            ));
        }
        if self.upload.timeout_ms == 0 {
            return Err(SessionError::Config(
                "Upload timeout must be positive".to_string(),
            ));
        }

        if self.server.key_prefix.split('/').any(|segment| segment == "..") {
            return Err(SessionError::Config(
                "Storage key prefix must not contain '..'".to_string(),
            ));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(SessionError::Config(
                "Upload size limit must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
