use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{InboundCall, OutboundCall, Rendezvous};
use crate::config::SignalingConfig;
use crate::errors::{Result, SessionError};
use crate::media::MediaHandle;

/// Holds at most one registration with the rendezvous service.
///
/// Reopening under a different identifier releases the previous
/// registration first, so a client never leaves a duplicate behind.
pub struct SignalingClient {
    rendezvous: Arc<dyn Rendezvous>,
    registration_timeout: Duration,
    peer_id: Option<String>,
    inbound: Option<mpsc::UnboundedReceiver<InboundCall>>,
    pump: Option<JoinHandle<()>>,
}

impl SignalingClient {
    pub fn new(rendezvous: Arc<dyn Rendezvous>, config: &SignalingConfig) -> Self {
        Self {
            rendezvous,
            registration_timeout: Duration::from_millis(config.registration_timeout_ms),
            peer_id: None,
            inbound: None,
            pump: None,
        }
    }

    /// Confirmed identifier of the live registration
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.peer_id.is_some()
    }

    /// Register with the rendezvous service and return the confirmed id.
    ///
    /// `None` asks the service to assign an identifier. Opening again with
    /// the current id (or with `None` while open) is a no-op.
    pub async fn open(&mut self, requested: Option<&str>) -> Result<String> {
        if let Some(current) = &self.peer_id {
            if requested.is_none() || requested == Some(current.as_str()) {
                return Ok(current.clone());
            }
            log::info!(
                "Identity changed from {} to {:?}, releasing previous registration",
                current,
                requested
            );
            self.close().await;
        }

        if requested == Some("") {
            return Err(SessionError::Signaling(
                "refusing to register an empty identifier".to_string(),
            ));
        }

        let registration = tokio::time::timeout(
            self.registration_timeout,
            self.rendezvous.register(requested),
        )
        .await
        .map_err(|_| {
            SessionError::Signaling(format!(
                "registration timed out after {:?}",
                self.registration_timeout
            ))
        })??;

        log::info!("Signaling open as {}", registration.peer_id);
        self.peer_id = Some(registration.peer_id.clone());
        self.inbound = Some(registration.inbound);
        Ok(registration.peer_id)
    }

    /// Route every inbound call to `handler`, one at a time, in arrival order.
    pub fn on_incoming_call<F, Fut>(&mut self, mut handler: F) -> Result<()>
    where
        F: FnMut(InboundCall) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inbound = self.inbound.take().ok_or_else(|| {
            SessionError::Signaling(
                "no open registration, or an inbound handler is already installed".to_string(),
            )
        })?;

        let peer_id = self.peer_id.clone().unwrap_or_default();
        self.pump = Some(tokio::spawn(async move {
            while let Some(call) = inbound.recv().await {
                log::info!("{} received a call from {}", peer_id, call.caller());
                handler(call).await;
            }
            log::debug!("Inbound call pump for {} finished", peer_id);
        }));
        Ok(())
    }

    /// Place a call from our registered id to `target`.
    pub async fn dial(&self, target: &str, local: &MediaHandle) -> Result<OutboundCall> {
        let from = self
            .peer_id
            .as_deref()
            .ok_or_else(|| SessionError::Signaling("signaling is not open".to_string()))?;
        self.rendezvous.dial(from, target, local).await
    }

    /// Release the registration. Safe to call any number of times.
    pub async fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.inbound = None;

        if let Some(peer_id) = self.peer_id.take() {
            if let Err(e) = self.rendezvous.unregister(&peer_id).await {
                log::warn!("Failed to unregister {}: {}", peer_id, e);
            }
            log::info!("Signaling closed for {}", peer_id);
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        // Dropping the receiver marks the registration abandoned.
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::LocalRendezvous;

    fn client(rendezvous: &LocalRendezvous) -> SignalingClient {
        SignalingClient::new(Arc::new(rendezvous.clone()), &SignalingConfig::default())
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let rendezvous = LocalRendezvous::new();
        let mut signaling = client(&rendezvous);

        let id = signaling.open(Some("SESSION42")).await.unwrap();
        assert_eq!(id, "SESSION42");
        assert!(rendezvous.is_registered("SESSION42").await);

        signaling.close().await;
        assert!(!signaling.is_open());
        assert!(!rendezvous.is_registered("SESSION42").await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let rendezvous = LocalRendezvous::new();
        let mut signaling = client(&rendezvous);
        signaling.open(Some("APP7")).await.unwrap();

        signaling.close().await;
        signaling.close().await;
        assert!(rendezvous.registered().await.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_same_id_is_noop() {
        let rendezvous = LocalRendezvous::new();
        let mut signaling = client(&rendezvous);
        signaling.open(Some("APP7")).await.unwrap();
        assert_eq!(signaling.open(Some("APP7")).await.unwrap(), "APP7");
        assert_eq!(rendezvous.registered().await, vec!["APP7".to_string()]);
    }

    #[tokio::test]
    async fn test_identity_change_releases_previous_registration() {
        let rendezvous = LocalRendezvous::new();
        let mut signaling = client(&rendezvous);
        signaling.open(Some("APP7")).await.unwrap();
        signaling.open(Some("APP8")).await.unwrap();
        assert_eq!(rendezvous.registered().await, vec!["APP8".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_id_is_refused() {
        let rendezvous = LocalRendezvous::new();
        let mut signaling = client(&rendezvous);
        assert!(signaling.open(Some("")).await.is_err());
        assert!(rendezvous.registered().await.is_empty());
    }

    #[tokio::test]
    async fn test_collision_is_reported_not_retried() {
        let rendezvous = LocalRendezvous::new();
        let mut first = client(&rendezvous);
        let mut second = client(&rendezvous);
        first.open(Some("SESSION42")).await.unwrap();

        let err = second.open(Some("SESSION42")).await.unwrap_err();
        assert!(matches!(err, SessionError::Signaling(_)));
        assert!(!second.is_open());
    }

    #[tokio::test]
    async fn test_handler_requires_registration() {
        let rendezvous = LocalRendezvous::new();
        let mut signaling = client(&rendezvous);
        assert!(signaling.on_incoming_call(|_call| async {}).is_err());

        signaling.open(Some("APP7")).await.unwrap();
        assert!(signaling.on_incoming_call(|_call| async {}).is_ok());
        assert!(signaling.on_incoming_call(|_call| async {}).is_err());
    }

    #[tokio::test]
    async fn test_dial_requires_open_signaling() {
        let rendezvous = LocalRendezvous::new();
        let signaling = client(&rendezvous);
        let media = MediaHandle::new(
            crate::media::MediaSource::Local,
            vec![crate::media::TrackKind::Video],
            4,
        );
        assert!(signaling.dial("APP7", &media).await.is_err());
    }
}
