use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::{CallDirection, CallSession, CallState, EndReason, SessionEvent};
use crate::config::SessionConfig;
use crate::errors::{Result, SessionError};
use crate::media::{MediaConstraints, MediaDevices, MediaHandle};
use crate::signaling::{InboundCall, SignalingClient};

const EVENT_CAPACITY: usize = 64;

/// Drives at most one call at a time through its state machine.
///
/// The local camera/microphone handle is owned here and reused across
/// calls while it stays live; ending a call stops it.
pub struct SessionNegotiator {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    negotiation_timeout: Duration,
    current: Option<CallSession>,
    local_media: Option<MediaHandle>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionNegotiator {
    pub fn new(devices: Arc<dyn MediaDevices>, config: &SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            devices,
            constraints: MediaConstraints::from(&config.media),
            negotiation_timeout: Duration::from_millis(config.signaling.negotiation_timeout_ms),
            current: None,
            local_media: None,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> CallState {
        self.current
            .as_ref()
            .map(CallSession::state)
            .unwrap_or(CallState::Idle)
    }

    pub fn current(&self) -> Option<&CallSession> {
        self.current.as_ref()
    }

    pub fn local_stream(&self) -> Option<&MediaHandle> {
        self.current.as_ref().and_then(CallSession::local_stream)
    }

    pub fn remote_stream(&self) -> Option<&MediaHandle> {
        self.current.as_ref().and_then(CallSession::remote_stream)
    }

    /// Whether a camera/microphone grant is currently held
    pub fn holds_local_media(&self) -> bool {
        self.local_media.as_ref().is_some_and(MediaHandle::is_live)
    }

    /// Call `target` through `signaling`.
    ///
    /// Rejected with `CallActive` while another call is in progress; the
    /// existing call is left untouched.
    pub async fn place_call(&mut self, signaling: &SignalingClient, target: &str) -> Result<()> {
        if target.trim().is_empty() {
            return Err(SessionError::InvalidTarget(
                "remote peer id is empty".to_string(),
            ));
        }
        self.ensure_idle()?;

        self.begin(target, CallDirection::Outbound)?;
        let local = self.acquire_for_call().await?;

        let timeout = self.negotiation_timeout;
        let outcome = async {
            let call = signaling.dial(target, &local).await?;
            tokio::time::timeout(timeout, call.remote_stream())
                .await
                .map_err(|_| {
                    SessionError::Negotiation(format!(
                        "{} did not answer within {:?}",
                        target, timeout
                    ))
                })?
        }
        .await;

        self.complete(outcome)
    }

    /// Answer an inbound call, or reject it when busy.
    pub async fn answer_call(&mut self, call: InboundCall) -> Result<()> {
        if let Err(e) = self.ensure_idle() {
            call.reject("busy");
            return Err(e);
        }

        self.begin(call.caller(), CallDirection::Inbound)?;
        let local = match self.acquire_for_call().await {
            Ok(local) => local,
            Err(e) => {
                call.reject("callee could not access camera or microphone");
                return Err(e);
            }
        };

        let outcome = call.answer(&local);
        self.complete(outcome)
    }

    /// End the current call and release its devices.
    ///
    /// Returns `None` when there was no active call.
    pub fn end_call(&mut self, reason: EndReason) -> Option<CallState> {
        let active = self.current.as_ref().is_some_and(|c| c.state().is_active());
        if !active {
            self.release_local_media();
            return None;
        }
        let previous = self.state();
        self.finish(reason);
        Some(previous)
    }

    /// Stop the held camera/microphone grant, if any.
    pub fn release_local_media(&mut self) {
        if let Some(local) = self.local_media.take() {
            local.stop();
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match &self.current {
            Some(call) if call.state().is_active() => Err(SessionError::CallActive(format!(
                "already {} with {}",
                call.state(),
                call.peer()
            ))),
            _ => Ok(()),
        }
    }

    fn begin(&mut self, peer: &str, direction: CallDirection) -> Result<()> {
        self.current = Some(CallSession::new(peer, direction));
        self.transition(CallState::AwaitingMedia)
    }

    /// AwaitingMedia -> Negotiating, or -> Ended when devices are refused.
    async fn acquire_for_call(&mut self) -> Result<MediaHandle> {
        match self.acquire_local_media().await {
            Ok(local) => {
                self.bind_local(local.clone());
                self.transition(CallState::Negotiating)?;
                Ok(local)
            }
            Err(e) => {
                log::warn!("Local media unavailable: {}", e);
                self.finish(EndReason::LocalMediaFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn acquire_local_media(&mut self) -> Result<MediaHandle> {
        if let Some(local) = self.local_media.as_ref().filter(|h| h.is_live()) {
            log::debug!("Reusing local media {}", local.id());
            return Ok(local.clone());
        }
        let local = self.devices.get_user_media(&self.constraints).await?;
        log::info!("Acquired local media {} ({:?})", local.id(), local.tracks());
        self.local_media = Some(local.clone());
        Ok(local)
    }

    /// Negotiating -> Connected on success, -> Ended otherwise.
    fn complete(&mut self, outcome: Result<MediaHandle>) -> Result<()> {
        let remote = match outcome {
            Ok(remote) => remote,
            Err(e) => {
                log::warn!("Negotiation failed: {}", e);
                self.finish(EndReason::NegotiationFailed(e.to_string()));
                return Err(e);
            }
        };

        let bound = match self.current.as_mut() {
            Some(call) => call.bind_remote(remote.clone()),
            None => Err(SessionError::Negotiation("call vanished".to_string())),
        };
        if let Err(e) = bound {
            remote.stop();
            self.finish(EndReason::NegotiationFailed(e.to_string()));
            return Err(e);
        }

        self.transition(CallState::Connected)?;
        self.emit(SessionEvent::RemoteStreamBound {
            call_id: self.call_id(),
            stream: remote,
        });
        Ok(())
    }

    fn bind_local(&mut self, local: MediaHandle) {
        if let Some(call) = self.current.as_mut() {
            call.bind_local(local.clone());
            let call_id = call.id().to_string();
            self.emit(SessionEvent::LocalStreamBound {
                call_id,
                stream: local,
            });
        }
    }

    fn finish(&mut self, reason: EndReason) {
        self.release_local_media();
        let Some(call) = self.current.as_mut() else {
            return;
        };
        call.finish(reason.clone());
        let call_id = call.id().to_string();
        if let Err(e) = self.transition(CallState::Ended) {
            log::warn!("{}", e);
        }
        log::info!("Call {} ended: {:?}", call_id, reason);
        self.emit(SessionEvent::Ended { call_id, reason });
    }

    fn transition(&mut self, next: CallState) -> Result<()> {
        let Some(call) = self.current.as_mut() else {
            return Err(SessionError::Negotiation("no call in progress".to_string()));
        };
        let previous = call.set_state(next)?;
        let call_id = call.id().to_string();
        log::info!(
            "Call {} with {}: {} -> {}",
            call_id,
            call.peer(),
            previous,
            next
        );
        self.emit(SessionEvent::StateChanged {
            call_id,
            from: previous,
            to: next,
        });
        Ok(())
    }

    fn call_id(&self) -> String {
        self.current
            .as_ref()
            .map(|c| c.id().to_string())
            .unwrap_or_default()
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for SessionNegotiator {
    fn drop(&mut self) {
        self.release_local_media();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{call_pair, LocalRendezvous};
    use crate::testing::SyntheticMediaDevices;

    fn negotiator(devices: &Arc<SyntheticMediaDevices>) -> SessionNegotiator {
        SessionNegotiator::new(devices.clone(), &SessionConfig::default())
    }

    fn offered() -> MediaHandle {
        MediaHandle::new(
            crate::media::MediaSource::Local,
            vec![crate::media::TrackKind::Video],
            4,
        )
    }

    #[tokio::test]
    async fn test_answer_reaches_connected() {
        let devices = Arc::new(SyntheticMediaDevices::new());
        let mut negotiator = negotiator(&devices);
        let mut events = negotiator.subscribe();

        let (inbound, outbound) = call_pair("SESSION42", "APP7", &offered());
        negotiator.answer_call(inbound).await.unwrap();

        assert_eq!(negotiator.state(), CallState::Connected);
        assert!(negotiator.local_stream().is_some());
        assert!(negotiator.remote_stream().is_some());
        assert!(outbound.remote_stream().await.is_ok());

        let mut local_seen = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::LocalStreamBound { .. } => local_seen = true,
                SessionEvent::RemoteStreamBound { .. } => {
                    assert!(local_seen, "local stream must be bound first")
                }
                _ => {}
            }
        }
        assert!(local_seen);
    }

    #[tokio::test]
    async fn test_denied_media_ends_without_negotiation() {
        let devices = Arc::new(SyntheticMediaDevices::denied());
        let mut negotiator = negotiator(&devices);

        let (inbound, outbound) = call_pair("SESSION42", "APP7", &offered());
        let err = negotiator.answer_call(inbound).await.unwrap_err();

        assert!(matches!(err, SessionError::LocalMedia(_)));
        assert_eq!(negotiator.state(), CallState::Ended);
        assert!(!negotiator.holds_local_media());
        assert!(outbound.remote_stream().await.is_err());
    }

    #[tokio::test]
    async fn test_second_inbound_call_is_rejected_while_connected() {
        let devices = Arc::new(SyntheticMediaDevices::new());
        let mut negotiator = negotiator(&devices);

        let (first, _first_out) = call_pair("SESSION42", "APP7", &offered());
        negotiator.answer_call(first).await.unwrap();
        let peer_before = negotiator.current().unwrap().id().to_string();

        let (second, second_out) = call_pair("OTHER", "APP7", &offered());
        let err = negotiator.answer_call(second).await.unwrap_err();
        assert!(matches!(err, SessionError::CallActive(_)));
        assert!(second_out.remote_stream().await.is_err());

        assert_eq!(negotiator.state(), CallState::Connected);
        assert_eq!(negotiator.current().unwrap().id(), peer_before);
    }

    #[tokio::test]
    async fn test_empty_target_is_invalid() {
        let devices = Arc::new(SyntheticMediaDevices::new());
        let mut negotiator = negotiator(&devices);
        let signaling = SignalingClient::new(
            Arc::new(LocalRendezvous::new()),
            &SessionConfig::default().signaling,
        );

        let err = negotiator.place_call(&signaling, "  ").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidTarget(_)));
        assert_eq!(negotiator.state(), CallState::Idle);
        assert_eq!(devices.grants(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_peer_ends_call_and_releases_media() {
        let devices = Arc::new(SyntheticMediaDevices::new());
        let mut negotiator = negotiator(&devices);
        let rendezvous = LocalRendezvous::new();
        let mut signaling =
            SignalingClient::new(Arc::new(rendezvous), &SessionConfig::default().signaling);
        signaling.open(Some("SESSION42")).await.unwrap();

        let err = negotiator.place_call(&signaling, "NOBODY").await.unwrap_err();
        assert!(matches!(err, SessionError::Negotiation(_)));
        assert_eq!(negotiator.state(), CallState::Ended);
        assert!(!negotiator.holds_local_media());
    }

    #[tokio::test]
    async fn test_end_call_stops_devices() {
        let devices = Arc::new(SyntheticMediaDevices::new());
        let mut negotiator = negotiator(&devices);
        let (inbound, _out) = call_pair("SESSION42", "APP7", &offered());
        negotiator.answer_call(inbound).await.unwrap();
        let local = negotiator.local_stream().unwrap().clone();

        assert_eq!(negotiator.end_call(EndReason::HangUp), Some(CallState::Connected));
        assert_eq!(negotiator.state(), CallState::Ended);
        assert!(!local.is_live());
        assert!(negotiator.remote_stream().is_none());
        assert_eq!(negotiator.end_call(EndReason::HangUp), None);
    }

    #[tokio::test]
    async fn test_new_call_allowed_after_end() {
        let devices = Arc::new(SyntheticMediaDevices::new());
        let mut negotiator = negotiator(&devices);

        let (first, _o1) = call_pair("SESSION42", "APP7", &offered());
        negotiator.answer_call(first).await.unwrap();
        negotiator.end_call(EndReason::HangUp);

        let (second, _o2) = call_pair("SESSION42", "APP7", &offered());
        negotiator.answer_call(second).await.unwrap();
        assert_eq!(negotiator.state(), CallState::Connected);
        assert_eq!(devices.grants(), 2);
    }
}
