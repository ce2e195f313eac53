use thiserror::Error;

/// Failures surfaced by the session orchestration layer.
///
/// Every asynchronous failure is converted into one of these at the boundary
/// of the operation that produced it. None of them is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Camera or microphone denied or unavailable.
    #[error("Local media error: {0}")]
    LocalMedia(String),
    /// Registration or lookup failure against the rendezvous service.
    #[error("Signaling error: {0}")]
    Signaling(String),
    /// Remote party unreachable or the handshake dropped.
    #[error("Negotiation error: {0}")]
    Negotiation(String),
    #[error("Invalid call target: {0}")]
    InvalidTarget(String),
    #[error("Call already active: {0}")]
    CallActive(String),
    #[error("Not connected: {0}")]
    NotConnected(String),
    #[error("Capture error: {0}")]
    Capture(String),
    /// Network failure or non-2xx response from a storage endpoint.
    #[error("Upload error: {0}")]
    Upload(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl SessionError {
    /// Short stable label, used in events and log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::LocalMedia(_) => "local_media",
            SessionError::Signaling(_) => "signaling",
            SessionError::Negotiation(_) => "negotiation",
            SessionError::InvalidTarget(_) => "invalid_target",
            SessionError::CallActive(_) => "call_active",
            SessionError::NotConnected(_) => "not_connected",
            SessionError::Capture(_) => "capture",
            SessionError::Upload(_) => "upload",
            SessionError::Config(_) => "config",
            SessionError::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category_and_detail() {
        let err = SessionError::LocalMedia("permission denied".to_string());
        assert_eq!(err.to_string(), "Local media error: permission denied");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SessionError = io.into();
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().contains("missing"));
    }
}
