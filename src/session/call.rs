use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CallDirection, CallState, EndReason};
use crate::errors::{Result, SessionError};
use crate::media::MediaHandle;

/// One call between this page instance and a remote peer
#[derive(Debug)]
pub struct CallSession {
    id: String,
    peer: String,
    direction: CallDirection,
    state: CallState,
    local_stream: Option<MediaHandle>,
    remote_stream: Option<MediaHandle>,
    started_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    end_reason: Option<EndReason>,
}

impl CallSession {
    pub(crate) fn new(peer: &str, direction: CallDirection) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            peer: peer.to_string(),
            direction,
            state: CallState::Idle,
            local_stream: None,
            remote_stream: None,
            started_at: Utc::now(),
            connected_at: None,
            end_reason: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn local_stream(&self) -> Option<&MediaHandle> {
        self.local_stream.as_ref()
    }

    /// Only present while `Connected`
    pub fn remote_stream(&self) -> Option<&MediaHandle> {
        match self.state {
            CallState::Connected => self.remote_stream.as_ref(),
            _ => None,
        }
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    pub(crate) fn set_state(&mut self, next: CallState) -> Result<CallState> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::Negotiation(format!(
                "invalid call transition {} -> {}",
                self.state, next
            )));
        }
        let previous = self.state;
        self.state = next;
        if next == CallState::Connected {
            self.connected_at = Some(Utc::now());
        }
        Ok(previous)
    }

    pub(crate) fn bind_local(&mut self, stream: MediaHandle) {
        self.local_stream = Some(stream);
    }

    /// Remote media is only accepted once the local preview is bound.
    pub(crate) fn bind_remote(&mut self, stream: MediaHandle) -> Result<()> {
        if self.local_stream.is_none() {
            return Err(SessionError::Negotiation(
                "remote stream arrived before the local stream was bound".to_string(),
            ));
        }
        self.remote_stream = Some(stream);
        Ok(())
    }

    /// Drop both streams, stopping the remote view. The local device is
    /// owned by the negotiator and released there.
    pub(crate) fn finish(&mut self, reason: EndReason) {
        if let Some(remote) = self.remote_stream.take() {
            remote.stop();
        }
        self.local_stream = None;
        self.end_reason = Some(reason);
    }

    pub fn summary(&self) -> CallSummary {
        CallSummary {
            id: self.id.clone(),
            peer: self.peer.clone(),
            direction: self.direction,
            state: self.state,
            started_at: self.started_at,
            connected_at: self.connected_at,
            end_reason: self.end_reason.clone(),
        }
    }
}

/// Serializable snapshot of a call for presentation layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSummary {
    pub id: String,
    pub peer: String,
    pub direction: CallDirection,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}
