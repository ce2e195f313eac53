//! Continuous recording of a bound stream into one artifact

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use super::{ArtifactKind, CaptureArtifact};
use crate::errors::{Result, SessionError};
use crate::identity::SessionMetadata;
use crate::media::{MediaChunk, MediaHandle};

/// Counters for one recording run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStats {
    /// Chunks accepted into the buffer
    pub chunks: u64,
    /// Empty chunks skipped
    pub empty_chunks: u64,
    /// Chunks lost because the recorder fell behind the stream
    pub lagged_chunks: u64,
    pub bytes: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl RecordingStats {
    pub fn duration_secs(&self) -> f64 {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => (stop - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

struct ActiveRecording {
    stream_id: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<(Vec<Bytes>, RecordingStats)>,
}

/// Records at most one stream at a time.
///
/// Chunks are buffered in arrival order by a background task. The buffer is
/// only turned into an artifact by [`Recorder::stop`], after the task has
/// drained everything already published.
pub struct Recorder {
    mime_type: String,
    active: Option<ActiveRecording>,
    last_stats: Option<RecordingStats>,
}

impl Recorder {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            active: None,
            last_stats: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Stats of the last finished run
    pub fn last_stats(&self) -> Option<&RecordingStats> {
        self.last_stats.as_ref()
    }

    /// Begin recording `stream`.
    ///
    /// Returns `Ok(false)` without side effects when a recording is
    /// already running.
    pub fn start(&mut self, stream: &MediaHandle) -> Result<bool> {
        if self.active.is_some() {
            log::debug!("Recording already active, ignoring start");
            return Ok(false);
        }
        if !stream.is_live() {
            return Err(SessionError::Capture(format!(
                "stream {} is not live",
                stream.id()
            )));
        }

        let chunks = stream.subscribe();
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(collect_chunks(chunks, stop_rx));

        log::info!("Recording started on {}", stream.id());
        self.active = Some(ActiveRecording {
            stream_id: stream.id().to_string(),
            stop,
            task,
        });
        Ok(true)
    }

    /// Finalize the buffer into one artifact and clear it.
    ///
    /// Returns `Ok(None)` when nothing was recording, or when the recording
    /// captured no data.
    pub async fn stop(&mut self, metadata: &SessionMetadata) -> Result<Option<CaptureArtifact>> {
        let Some((chunks, stats)) = self.finish().await? else {
            return Ok(None);
        };

        if chunks.is_empty() {
            log::warn!("Recording stopped without any data, no artifact produced");
            return Ok(None);
        }

        let mut payload = BytesMut::with_capacity(stats.bytes as usize);
        for chunk in &chunks {
            payload.extend_from_slice(chunk);
        }

        log::info!(
            "Recording finalized: {} chunks, {} bytes",
            stats.chunks,
            payload.len()
        );
        Ok(Some(CaptureArtifact::new(
            ArtifactKind::Recording,
            payload.freeze(),
            self.mime_type.clone(),
            metadata,
        )))
    }

    /// Stop and throw the buffered data away. Returns whether anything was
    /// recording.
    pub async fn discard(&mut self) -> Result<bool> {
        match self.finish().await? {
            Some((chunks, _)) => {
                log::info!("Recording discarded ({} chunks)", chunks.len());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn finish(&mut self) -> Result<Option<(Vec<Bytes>, RecordingStats)>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        // The task may already have finished because the stream closed.
        let _ = active.stop.send(());
        let (chunks, stats) = active.task.await.map_err(|e| {
            SessionError::Capture(format!(
                "recording task for {} failed: {}",
                active.stream_id, e
            ))
        })?;
        if stats.lagged_chunks > 0 {
            log::warn!(
                "Recording of {} lost {} chunks",
                active.stream_id,
                stats.lagged_chunks
            );
        }
        self.last_stats = Some(stats.clone());
        Ok(Some((chunks, stats)))
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new("video/webm")
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
    }
}

async fn collect_chunks(
    mut chunks: broadcast::Receiver<MediaChunk>,
    mut stop: oneshot::Receiver<()>,
) -> (Vec<Bytes>, RecordingStats) {
    let mut buffer = Vec::new();
    let mut stats = RecordingStats {
        started_at: Some(Utc::now()),
        ..RecordingStats::default()
    };

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            received = chunks.recv() => match received {
                Ok(chunk) => accept(&mut buffer, &mut stats, chunk),
                Err(broadcast::error::RecvError::Lagged(n)) => stats.lagged_chunks += n,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    // Keep whatever was published before the stop request.
    loop {
        match chunks.try_recv() {
            Ok(chunk) => accept(&mut buffer, &mut stats, chunk),
            Err(broadcast::error::TryRecvError::Lagged(n)) => stats.lagged_chunks += n,
            Err(_) => break,
        }
    }

    stats.stopped_at = Some(Utc::now());
    (buffer, stats)
}

fn accept(buffer: &mut Vec<Bytes>, stats: &mut RecordingStats, chunk: MediaChunk) {
    if chunk.data.is_empty() {
        stats.empty_chunks += 1;
        return;
    }
    log::debug!("Recorded chunk {} ({} bytes)", chunk.sequence, chunk.data.len());
    stats.chunks += 1;
    stats.bytes += chunk.data.len() as u64;
    buffer.push(chunk.data);
}
