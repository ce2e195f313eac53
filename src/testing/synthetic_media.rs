//! Synthetic capture devices
//!
//! Stand-ins for a camera and microphone that behave like the real thing
//! from the session's point of view: permission can be denied, grants are
//! counted, and streams publish a gradient frame plus fake encoded chunks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::errors::{Result, SessionError};
use crate::media::{MediaConstraints, MediaDevices, MediaHandle, MediaSource, VideoFrame};

/// Create an RGBA gradient frame that changes with `frame_number`
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32) -> VideoFrame {
    let mut data = vec![0u8; width as usize * height as usize * 4];

    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = pixel_offset(x, y, width);
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(x.wrapping_add(y) as u8);
            data[idx + 3] = 255;
        }
    }

    VideoFrame::new(width, height, data)
}

/// Byte offset of an RGBA pixel
fn pixel_offset(x: u32, y: u32, width: u32) -> usize {
    (y as usize * width as usize + x as usize) * 4
}

/// A fake encoded chunk: a short tagged header followed by filler bytes
pub fn synthetic_chunk(sequence: u64, len: usize) -> Vec<u8> {
    let mut chunk = format!("chunk-{:06}:", sequence).into_bytes();
    chunk.resize(len.max(chunk.len()), (sequence % 251) as u8);
    chunk
}

/// Capture devices backed by generated data
#[derive(Debug, Default)]
pub struct SyntheticMediaDevices {
    deny: AtomicBool,
    grants: AtomicUsize,
}

impl SyntheticMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices that refuse every request, as if the user denied permission
    pub fn denied() -> Self {
        let devices = Self::default();
        devices.set_denied(true);
        devices
    }

    pub fn set_denied(&self, denied: bool) {
        self.deny.store(denied, Ordering::SeqCst);
    }

    /// Number of successful acquisitions so far
    pub fn grants(&self) -> usize {
        self.grants.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for SyntheticMediaDevices {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaHandle> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(SessionError::LocalMedia(
                "permission denied by user".to_string(),
            ));
        }
        let tracks = constraints.tracks();
        if tracks.is_empty() {
            return Err(SessionError::LocalMedia(
                "no audio or video track requested".to_string(),
            ));
        }

        let handle = MediaHandle::new(MediaSource::Local, tracks, constraints.chunk_buffer);
        if constraints.video {
            handle.publish_frame(synthetic_video_frame(0, constraints.width, constraints.height));
        }
        self.grants.fetch_add(1, Ordering::SeqCst);
        log::debug!("Synthetic devices granted media {}", handle.id());
        Ok(handle)
    }
}

/// Keep publishing chunks and frames on `handle` until it stops.
pub fn drive_synthetic_feed(
    handle: MediaHandle,
    interval: Duration,
    chunk_len: usize,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut published = 0u64;
        let size = handle.current_frame().map(|f| (f.width, f.height));
        loop {
            tokio::select! {
                _ = handle.ended() => break,
                _ = ticker.tick() => {
                    let Some(sequence) = handle.push_chunk(synthetic_chunk(published + 1, chunk_len)) else {
                        break;
                    };
                    if let Some((width, height)) = size {
                        handle.publish_frame(synthetic_video_frame(sequence, width, height));
                    }
                    published += 1;
                }
            }
        }
        published
    })
}
