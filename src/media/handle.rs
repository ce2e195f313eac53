//! Live media streams shared between the negotiator and the capture pipeline

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch};

use super::{MediaChunk, MediaSource, TrackKind, VideoFrame};

/// Producer side of a stream: encoded chunks plus the latest decoded frame.
struct Feed {
    open: watch::Sender<bool>,
    next_sequence: AtomicU64,
    chunks: broadcast::Sender<MediaChunk>,
    frame: RwLock<Option<VideoFrame>>,
}

/// Abstract reference to a live audio/video stream.
///
/// Clones refer to the same stream. A remote view created with
/// [`MediaHandle::remote_view`] reads the same feed but has its own
/// liveness: stopping the view never stops the device behind it.
#[derive(Clone)]
pub struct MediaHandle {
    id: String,
    source: MediaSource,
    tracks: Vec<TrackKind>,
    owns_feed: bool,
    live: Arc<watch::Sender<bool>>,
    feed: Arc<Feed>,
}

impl MediaHandle {
    /// Create a stream owned by a capture device.
    pub fn new(source: MediaSource, tracks: Vec<TrackKind>, chunk_capacity: usize) -> Self {
        let (chunks, _) = broadcast::channel(chunk_capacity.max(1));
        let (open, _) = watch::channel(true);
        let (live, _) = watch::channel(true);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            tracks,
            owns_feed: true,
            live: Arc::new(live),
            feed: Arc::new(Feed {
                open,
                next_sequence: AtomicU64::new(1),
                chunks,
                frame: RwLock::new(None),
            }),
        }
    }

    /// A view of this stream as the other party receives it.
    pub fn remote_view(&self) -> MediaHandle {
        let (live, _) = watch::channel(true);
        MediaHandle {
            id: format!("{}:remote", self.id),
            source: MediaSource::Remote,
            tracks: self.tracks.clone(),
            owns_feed: false,
            live: Arc::new(live),
            feed: Arc::clone(&self.feed),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> MediaSource {
        self.source
    }

    pub fn tracks(&self) -> &[TrackKind] {
        &self.tracks
    }

    pub fn has_video(&self) -> bool {
        self.tracks.contains(&TrackKind::Video)
    }

    pub fn is_live(&self) -> bool {
        *self.live.borrow() && *self.feed.open.borrow()
    }

    /// Stop every track of this handle. Returns whether it was live.
    ///
    /// Stopping the owning handle closes the feed for every remote view.
    pub fn stop(&self) -> bool {
        let was_live = self.live.send_replace(false);
        if self.owns_feed {
            self.feed.open.send_replace(false);
        }
        if was_live {
            log::info!(
                "Stopped {:?} media {} ({} tracks)",
                self.source,
                self.id,
                self.tracks.len()
            );
        }
        was_live
    }

    /// Resolves once this handle is stopped or its feed closes.
    pub async fn ended(&self) {
        let mut live = self.live.subscribe();
        let mut open = self.feed.open.subscribe();
        loop {
            if !*live.borrow_and_update() || !*open.borrow_and_update() {
                return;
            }
            tokio::select! {
                changed = live.changed() => if changed.is_err() { return },
                changed = open.changed() => if changed.is_err() { return },
            }
        }
    }

    /// Receive encoded chunks published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<MediaChunk> {
        self.feed.chunks.subscribe()
    }

    /// Publish one encoded chunk. Returns its sequence number, or `None`
    /// when the feed is closed.
    pub fn push_chunk(&self, data: impl Into<Bytes>) -> Option<u64> {
        self.push_chunk_at(data, Utc::now())
    }

    pub fn push_chunk_at(&self, data: impl Into<Bytes>, captured_at: DateTime<Utc>) -> Option<u64> {
        if !*self.feed.open.borrow() {
            return None;
        }
        let sequence = self.feed.next_sequence.fetch_add(1, Ordering::Relaxed);
        let chunk = MediaChunk {
            sequence,
            data: data.into(),
            captured_at,
        };
        // No subscribers simply means nobody is recording.
        let _ = self.feed.chunks.send(chunk);
        Some(sequence)
    }

    /// Replace the frame currently shown for this stream.
    pub fn publish_frame(&self, frame: VideoFrame) {
        let mut slot = self.feed.frame.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(frame);
    }

    /// The frame currently shown for this stream, if any has been rendered.
    pub fn current_frame(&self) -> Option<VideoFrame> {
        self.feed
            .frame
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether both handles read the same feed.
    pub fn same_feed(&self, other: &MediaHandle) -> bool {
        Arc::ptr_eq(&self.feed, &other.feed)
    }
}

impl std::fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaHandle")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("tracks", &self.tracks)
            .field("live", &self.is_live())
            .finish()
    }
}
