use serde::{Deserialize, Serialize};

use crate::media::MediaHandle;

/// Lifecycle of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    AwaitingMedia,
    Negotiating,
    Connected,
    Ended,
}

impl CallState {
    /// States that hold devices or a peer and block a second call
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::AwaitingMedia | CallState::Negotiating | CallState::Connected
        )
    }

    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Idle, AwaitingMedia)
                | (AwaitingMedia, Negotiating)
                | (AwaitingMedia, Ended)
                | (Negotiating, Connected)
                | (Negotiating, Ended)
                | (Connected, Ended)
        )
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::AwaitingMedia => "awaiting_media",
            CallState::Negotiating => "negotiating",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Why a call reached `Ended`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum EndReason {
    HangUp,
    RemoteHangUp,
    LocalMediaFailed(String),
    NegotiationFailed(String),
    Teardown,
}

/// Notifications published by the negotiator
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        call_id: String,
        from: CallState,
        to: CallState,
    },
    /// Local preview is available; always precedes `RemoteStreamBound`
    LocalStreamBound { call_id: String, stream: MediaHandle },
    RemoteStreamBound { call_id: String, stream: MediaHandle },
    Ended { call_id: String, reason: EndReason },
}
