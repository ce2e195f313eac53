//! Media streams and device acquisition
//!
//! A [`MediaHandle`] stands in for a browser `MediaStream`: it carries the
//! encoded chunks a recorder consumes and the latest rendered frame a
//! screenshot reads. Device access goes through the [`MediaDevices`] trait so
//! hosts can plug in their own capture stack.

mod handle;

pub use handle::MediaHandle;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MediaConfig;
use crate::errors::Result;

/// Whether a stream was captured on this side or received from the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// One encoded slice of a stream, as a recorder would receive it
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub sequence: u64,
    pub data: Bytes,
    pub captured_at: DateTime<Utc>,
}

/// A decoded RGBA frame at the stream's native resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
            captured_at: Utc::now(),
        }
    }

    /// Bytes an RGBA buffer of this size must hold
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }
}

/// What to ask the capture devices for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
    pub width: u32,
    pub height: u32,
    pub chunk_buffer: usize,
}

impl MediaConstraints {
    pub fn tracks(&self) -> Vec<TrackKind> {
        let mut tracks = Vec::with_capacity(2);
        if self.video {
            tracks.push(TrackKind::Video);
        }
        if self.audio {
            tracks.push(TrackKind::Audio);
        }
        tracks
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        MediaConstraints::from(&MediaConfig::default())
    }
}

impl From<&MediaConfig> for MediaConstraints {
    fn from(config: &MediaConfig) -> Self {
        Self {
            video: config.video,
            audio: config.audio,
            width: config.width,
            height: config.height,
            chunk_buffer: config.chunk_buffer,
        }
    }
}

/// Camera/microphone access.
///
/// Implementations return `SessionError::LocalMedia` when permission is
/// denied or no device is available.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaHandle>;
}
