//! ekyc-session: applicant/admin video session orchestration
//!
//! This crate coordinates a two-party eKYC video session: it derives the
//! rendezvous identity for each side, registers it with a signaling service,
//! drives the call through its state machine, records or snapshots the
//! remote party, and uploads the resulting artifacts to storage.
//!
//! # Features
//! - Deterministic peer identity from role and session code
//! - Single-call negotiation with strict local-before-remote stream binding
//! - Continuous recording and on-demand PNG screenshots
//! - Independent, fire-and-forget multipart uploads with status tracking
//! - Reference storage endpoints built on axum
//!
//! # Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use ekyc_session::{EkycRoom, EntryParams, LocalRendezvous, SessionConfig};
//! use ekyc_session::testing::SyntheticMediaDevices;
//!
//! let rendezvous = Arc::new(LocalRendezvous::new());
//! let mut admin = EkycRoom::open(
//!     SessionConfig::load_or_default(),
//!     &EntryParams::admin("SESSION42", "APP7"),
//!     rendezvous.clone(),
//!     Arc::new(SyntheticMediaDevices::new()),
//! )
//! .await?;
//! admin.call("APP7").await?;
//! admin.start_recording().await?;
//! ```
pub mod capture;
pub mod config;
pub mod errors;
pub mod identity;
pub mod media;
pub mod room;
pub mod server;
pub mod session;
pub mod signaling;
pub mod upload;

// Testing utilities - synthetic devices for offline sessions
pub mod testing;

// Re-exports for convenience
pub use capture::{ArtifactKind, CaptureArtifact, Recorder};
pub use config::SessionConfig;
pub use errors::{Result, SessionError};
pub use identity::{resolve_peer_id, EntryParams, Role, SessionIdentity, SessionMetadata};
pub use media::{MediaDevices, MediaHandle};
pub use room::{EkycRoom, RoomEvent};
pub use session::{CallState, SessionNegotiator};
pub use signaling::{LocalRendezvous, Rendezvous, SignalingClient};
pub use upload::{UploadCoordinator, UploadStatus, UploadTask};

/// Initialize logging for the session layer
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "ekyc_session=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
