//! Signaling against a rendezvous service
//!
//! The rendezvous service lets two parties find each other by identifier
//! before any media flows. Its wire protocol belongs to the host; this module
//! only needs the [`Rendezvous`] seam. [`LocalRendezvous`] is an in-process
//! broker for single-process deployments, demos and tests.

mod call;
mod client;
mod local;

pub use call::{call_pair, InboundCall, OutboundCall};
pub use client::SignalingClient;
pub use local::LocalRendezvous;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::media::MediaHandle;

/// A confirmed registration with the rendezvous service
#[derive(Debug)]
pub struct Registration {
    /// Confirmed identifier, which may differ from the one requested
    pub peer_id: String,
    /// Calls placed towards `peer_id`
    pub inbound: mpsc::UnboundedReceiver<InboundCall>,
}

/// External rendezvous/signaling service
#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Register `requested`, or ask the service to assign an id when `None`.
    async fn register(&self, requested: Option<&str>) -> Result<Registration>;

    /// Release a registration. Unknown ids are not an error.
    async fn unregister(&self, peer_id: &str) -> Result<()>;

    /// Offer `local` to `to` on behalf of `from`.
    async fn dial(&self, from: &str, to: &str, local: &MediaHandle) -> Result<OutboundCall>;
}
