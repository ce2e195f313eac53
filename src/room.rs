//! One page instance: identity, signaling, the call, capture and uploads
//!
//! [`EkycRoom`] owns every live handle for the session and is the only
//! place teardown and identity changes are decided. Presentation layers
//! subscribe to [`RoomEvent`]s instead of reading domain state directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::capture::{capture_screenshot, ArtifactKind, Recorder};
use crate::config::{CaptureSource, SessionConfig, TeardownPolicy};
use crate::errors::{Result, SessionError};
use crate::identity::{EntryParams, Role, SessionIdentity};
use crate::media::{MediaDevices, MediaHandle};
use crate::session::{CallState, CallSummary, EndReason, SessionEvent, SessionNegotiator};
use crate::signaling::{Rendezvous, SignalingClient};
use crate::upload::{UploadCoordinator, UploadStatus, UploadTask};

const EVENT_CAPACITY: usize = 128;

/// Notifications for presentation layers
#[derive(Debug, Clone)]
pub enum RoomEvent {
    Registered {
        peer_id: String,
    },
    Unregistered {
        peer_id: String,
    },
    CallStateChanged {
        call_id: String,
        from: CallState,
        to: CallState,
    },
    LocalStreamReady {
        stream: MediaHandle,
    },
    RemoteStreamReady {
        stream: MediaHandle,
    },
    CallEnded {
        call_id: String,
        reason: EndReason,
    },
    /// An inbound call could not be answered
    CallFailed {
        kind: &'static str,
        message: String,
    },
    RecordingStarted {
        stream_id: String,
    },
    /// `bytes` is zero when nothing was kept
    RecordingStopped {
        bytes: usize,
    },
    UploadStatusChanged {
        task_id: String,
        kind: ArtifactKind,
        status: UploadStatus,
    },
}

pub struct EkycRoom {
    config: SessionConfig,
    identity: SessionIdentity,
    signaling: SignalingClient,
    negotiator: Arc<Mutex<SessionNegotiator>>,
    /// Set while an outbound call holds the negotiator
    dialing: Arc<AtomicBool>,
    recorder: Recorder,
    uploads: UploadCoordinator,
    events: broadcast::Sender<RoomEvent>,
    forwarder: JoinHandle<()>,
    torn_down: bool,
}

impl EkycRoom {
    /// Resolve the identity, register it and start accepting calls.
    pub async fn open(
        config: SessionConfig,
        params: &EntryParams,
        rendezvous: Arc<dyn Rendezvous>,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<Self> {
        config.validate()?;
        if config.capture.screenshot_source == CaptureSource::Local {
            log::warn!("Screenshots will capture the local preview, not the remote party");
        }
        if config.capture.recording_source == CaptureSource::Local {
            log::warn!("Recordings will capture the local preview, not the remote party");
        }

        let mut identity = SessionIdentity::resolve(params);
        let request = identity
            .registration_request(config.signaling.assign_applicant_ids)
            .ok_or_else(|| missing_identity(&identity))?;

        let negotiator = SessionNegotiator::new(devices, &config);
        let session_events = negotiator.subscribe();
        let negotiator = Arc::new(Mutex::new(negotiator));

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let forwarder = tokio::spawn(forward_session_events(
            session_events,
            Arc::downgrade(&negotiator),
            events.clone(),
        ));

        let mut signaling = SignalingClient::new(rendezvous, &config.signaling);
        let peer_id = match signaling.open(request.requested_id()).await {
            Ok(peer_id) => peer_id,
            Err(e) => {
                forwarder.abort();
                return Err(e);
            }
        };
        identity.confirm(peer_id.clone());

        let uploads = UploadCoordinator::new(&config.upload)?;
        let recorder = Recorder::new(config.capture.recording_mime.clone());

        let mut room = Self {
            config,
            identity,
            signaling,
            negotiator,
            dialing: Arc::new(AtomicBool::new(false)),
            recorder,
            uploads,
            events,
            forwarder,
            torn_down: false,
        };
        room.accept_inbound_calls()?;
        room.emit(RoomEvent::Registered { peer_id });
        log::info!(
            "Room open as {} ({}) for session {}",
            room.identity.local_peer_id,
            room.identity.role,
            room.identity.session_code
        );
        Ok(room)
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Confirmed rendezvous id, `None` after teardown
    pub fn peer_id(&self) -> Option<&str> {
        self.signaling.peer_id()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub async fn call_state(&self) -> CallState {
        self.negotiator.lock().await.state()
    }

    pub async fn call_summary(&self) -> Option<CallSummary> {
        self.negotiator.lock().await.current().map(|c| c.summary())
    }

    pub async fn local_stream(&self) -> Option<MediaHandle> {
        self.negotiator.lock().await.local_stream().cloned()
    }

    pub async fn remote_stream(&self) -> Option<MediaHandle> {
        self.negotiator.lock().await.remote_stream().cloned()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Call `target` and wait until the call is connected or has failed.
    ///
    /// Inbound calls arriving meanwhile are rejected as busy.
    pub async fn call(&self, target: &str) -> Result<()> {
        self.ensure_open()?;
        if self.dialing.swap(true, Ordering::SeqCst) {
            return Err(SessionError::CallActive(
                "an outbound call is already being placed".to_string(),
            ));
        }
        let _dialing = DialingGuard(&self.dialing);
        let mut negotiator = self.negotiator.lock().await;
        negotiator.place_call(&self.signaling, target).await
    }

    /// End the current call. A running recording is handled per the
    /// configured teardown policy; `finalize` returns its upload.
    pub async fn hang_up(&mut self) -> Result<Option<UploadTask>> {
        let ended = self.negotiator.lock().await.end_call(EndReason::HangUp);
        if ended.is_none() {
            log::debug!("Hang up without an active call");
        }
        self.apply_teardown_policy(false).await
    }

    /// Start recording the configured stream. Admin only, requires a
    /// connected call.
    pub async fn start_recording(&mut self) -> Result<bool> {
        self.ensure_admin("record")?;
        let stream = self
            .connected_stream(self.config.capture.recording_source)
            .await?;
        let started = self.recorder.start(&stream)?;
        if started {
            self.emit(RoomEvent::RecordingStarted {
                stream_id: stream.id().to_string(),
            });
        }
        Ok(started)
    }

    /// Finalize the recording and submit it for upload.
    ///
    /// `Ok(None)` when nothing was recording or nothing was captured.
    pub async fn stop_recording(&mut self) -> Result<Option<UploadTask>> {
        if !self.recorder.is_recording() {
            return Ok(None);
        }
        let artifact = self.recorder.stop(&self.identity.metadata()).await?;
        self.emit(RoomEvent::RecordingStopped {
            bytes: artifact.as_ref().map_or(0, |a| a.len()),
        });
        Ok(artifact.map(|artifact| self.submit(artifact)))
    }

    /// Snapshot the configured stream and submit it for upload. Admin only.
    pub async fn capture_screenshot(&self) -> Result<UploadTask> {
        self.ensure_admin("take screenshots")?;
        let stream = self
            .connected_stream(self.config.capture.screenshot_source)
            .await?;
        let artifact = capture_screenshot(&stream, &self.identity.metadata())?;
        Ok(self.submit(artifact))
    }

    /// Switch to a new identity, releasing the previous registration first.
    ///
    /// Returns the confirmed peer id. Unchanged inputs are a no-op.
    pub async fn change_identity(&mut self, params: &EntryParams) -> Result<String> {
        self.ensure_open()?;
        let identity = SessionIdentity::resolve(params);
        let request = identity
            .registration_request(self.config.signaling.assign_applicant_ids)
            .ok_or_else(|| missing_identity(&identity))?;

        if identity.role == self.identity.role
            && identity.session_code == self.identity.session_code
            && identity.applicant_id == self.identity.applicant_id
        {
            if let Some(peer_id) = self.signaling.peer_id() {
                return Ok(peer_id.to_string());
            }
        }

        log::info!(
            "Identity change: {} -> {:?}",
            self.identity.local_peer_id,
            request.requested_id()
        );
        self.negotiator.lock().await.end_call(EndReason::Teardown);
        self.apply_teardown_policy(true).await?;

        let previous = self.signaling.peer_id().map(str::to_string);
        self.signaling.close().await;
        if let Some(peer_id) = previous {
            self.emit(RoomEvent::Unregistered { peer_id });
        }

        let peer_id = self.signaling.open(request.requested_id()).await?;
        self.identity = identity;
        self.identity.confirm(peer_id.clone());
        self.accept_inbound_calls()?;
        self.emit(RoomEvent::Registered {
            peer_id: peer_id.clone(),
        });
        Ok(peer_id)
    }

    /// Release the registration and the devices, and settle the recording
    /// per the teardown policy. In-flight uploads keep running.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn teardown(&mut self) -> Result<Option<UploadTask>> {
        if self.torn_down {
            return Ok(None);
        }
        self.torn_down = true;

        let previous = self.signaling.peer_id().map(str::to_string);
        self.signaling.close().await;
        if let Some(peer_id) = previous {
            self.emit(RoomEvent::Unregistered { peer_id });
        }

        {
            let mut negotiator = self.negotiator.lock().await;
            negotiator.end_call(EndReason::Teardown);
            negotiator.release_local_media();
        }

        let upload = self.apply_teardown_policy(true).await;
        log::info!("Room for session {} torn down", self.identity.session_code);
        upload
    }

    fn accept_inbound_calls(&mut self) -> Result<()> {
        let negotiator = Arc::clone(&self.negotiator);
        let dialing = Arc::clone(&self.dialing);
        let events = self.events.clone();
        self.signaling.on_incoming_call(move |call| {
            let negotiator = Arc::clone(&negotiator);
            let dialing = Arc::clone(&dialing);
            let events = events.clone();
            async move {
                let result = if dialing.load(Ordering::SeqCst) {
                    let caller = call.caller().to_string();
                    call.reject("busy");
                    Err(SessionError::CallActive(format!(
                        "placing an outbound call, {} was turned away",
                        caller
                    )))
                } else {
                    negotiator.lock().await.answer_call(call).await
                };
                if let Err(e) = result {
                    log::warn!("Inbound call failed: {}", e);
                    let _ = events.send(RoomEvent::CallFailed {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        })
    }

    async fn apply_teardown_policy(&mut self, closing: bool) -> Result<Option<UploadTask>> {
        if !self.recorder.is_recording() {
            return Ok(None);
        }
        match self.config.capture.teardown_policy {
            TeardownPolicy::Continue if !closing => {
                log::info!("Call ended, recording left running");
                Ok(None)
            }
            TeardownPolicy::Finalize => self.stop_recording().await,
            TeardownPolicy::Continue | TeardownPolicy::Discard => {
                self.recorder.discard().await?;
                self.emit(RoomEvent::RecordingStopped { bytes: 0 });
                Ok(None)
            }
        }
    }

    async fn connected_stream(&self, source: CaptureSource) -> Result<MediaHandle> {
        let negotiator = self.negotiator.lock().await;
        if negotiator.state() != CallState::Connected {
            return Err(SessionError::NotConnected(format!(
                "call is {}",
                negotiator.state()
            )));
        }
        let stream = match source {
            CaptureSource::Remote => negotiator.remote_stream(),
            CaptureSource::Local => negotiator.local_stream(),
        };
        stream
            .cloned()
            .ok_or_else(|| SessionError::NotConnected(format!("no {:?} stream bound", source)))
    }

    fn submit(&self, artifact: crate::capture::CaptureArtifact) -> UploadTask {
        let task = self.uploads.submit(artifact);
        let mut status = task.watch();
        let events = self.events.clone();
        let task_id = task.id().to_string();
        let kind = task.kind();
        tokio::spawn(async move {
            loop {
                let current = status.borrow_and_update().clone();
                let terminal = current.is_terminal();
                let _ = events.send(RoomEvent::UploadStatusChanged {
                    task_id: task_id.clone(),
                    kind,
                    status: current,
                });
                if terminal || status.changed().await.is_err() {
                    break;
                }
            }
        });
        task
    }

    fn ensure_open(&self) -> Result<()> {
        if self.torn_down {
            return Err(SessionError::Signaling("room has been torn down".to_string()));
        }
        Ok(())
    }

    fn ensure_admin(&self, action: &str) -> Result<()> {
        if self.identity.role != Role::Admin {
            return Err(SessionError::Capture(format!(
                "only the admin may {}",
                action
            )));
        }
        Ok(())
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for EkycRoom {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Clears the dialing flag when `call` finishes or is dropped
struct DialingGuard<'a>(&'a AtomicBool);

impl Drop for DialingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn missing_identity(identity: &SessionIdentity) -> SessionError {
    SessionError::Signaling(format!(
        "cannot register {}: identity inputs are missing",
        identity.role
    ))
}

/// Translate negotiator events and end calls whose remote side went away.
async fn forward_session_events(
    mut session_events: broadcast::Receiver<SessionEvent>,
    negotiator: Weak<Mutex<SessionNegotiator>>,
    events: broadcast::Sender<RoomEvent>,
) {
    loop {
        let event = match session_events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("Room dropped {} session events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let room_event = match event {
            SessionEvent::StateChanged { call_id, from, to } => {
                RoomEvent::CallStateChanged { call_id, from, to }
            }
            SessionEvent::LocalStreamBound { stream, .. } => RoomEvent::LocalStreamReady { stream },
            SessionEvent::RemoteStreamBound { call_id, stream } => {
                tokio::spawn(watch_remote_hang_up(
                    call_id,
                    stream.clone(),
                    negotiator.clone(),
                ));
                RoomEvent::RemoteStreamReady { stream }
            }
            SessionEvent::Ended { call_id, reason } => RoomEvent::CallEnded { call_id, reason },
        };
        let _ = events.send(room_event);
    }
}

async fn watch_remote_hang_up(
    call_id: String,
    remote: MediaHandle,
    negotiator: Weak<Mutex<SessionNegotiator>>,
) {
    remote.ended().await;
    let Some(negotiator) = negotiator.upgrade() else {
        return;
    };
    let mut negotiator = negotiator.lock().await;
    let still_connected = negotiator
        .current()
        .is_some_and(|c| c.id() == call_id && c.state() == CallState::Connected);
    if still_connected {
        log::info!("Remote side of call {} went away", call_id);
        negotiator.end_call(EndReason::RemoteHangUp);
    }
}
