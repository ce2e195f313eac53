use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::{call_pair, InboundCall, OutboundCall, Registration, Rendezvous};
use crate::errors::{Result, SessionError};
use crate::media::MediaHandle;

/// In-process rendezvous broker.
///
/// Identifiers are unique while their registration is alive; a registration
/// whose client went away without unregistering is reclaimed on the next
/// attempt to take the same id.
#[derive(Clone, Default)]
pub struct LocalRendezvous {
    peers: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<InboundCall>>>>,
}

impl LocalRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_registered(&self, peer_id: &str) -> bool {
        self.peers
            .lock()
            .await
            .get(peer_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Identifiers with a live registration
    pub async fn registered(&self) -> Vec<String> {
        let peers = self.peers.lock().await;
        let mut ids: Vec<String> = peers
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl Rendezvous for LocalRendezvous {
    async fn register(&self, requested: Option<&str>) -> Result<Registration> {
        let peer_id = match requested {
            Some("") => {
                return Err(SessionError::Signaling(
                    "cannot register an empty identifier".to_string(),
                ))
            }
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let mut peers = self.peers.lock().await;
        if peers.get(&peer_id).is_some_and(|tx| !tx.is_closed()) {
            return Err(SessionError::Signaling(format!(
                "ID \"{}\" is taken",
                peer_id
            )));
        }

        let (tx, inbound) = mpsc::unbounded_channel();
        peers.insert(peer_id.clone(), tx);
        log::debug!("Rendezvous registered {}", peer_id);
        Ok(Registration { peer_id, inbound })
    }

    async fn unregister(&self, peer_id: &str) -> Result<()> {
        if self.peers.lock().await.remove(peer_id).is_some() {
            log::debug!("Rendezvous unregistered {}", peer_id);
        }
        Ok(())
    }

    async fn dial(&self, from: &str, to: &str, local: &MediaHandle) -> Result<OutboundCall> {
        if to.is_empty() {
            return Err(SessionError::InvalidTarget("empty peer id".to_string()));
        }

        let peers = self.peers.lock().await;
        let tx = peers
            .get(to)
            .filter(|tx| !tx.is_closed())
            .ok_or_else(|| SessionError::Negotiation(format!("could not connect to peer {}", to)))?;

        let (inbound, outbound) = call_pair(from, to, local);
        tx.send(inbound)
            .map_err(|_| SessionError::Negotiation(format!("peer {} stopped listening", to)))?;
        log::debug!("Rendezvous routed call {} -> {}", from, to);
        Ok(outbound)
    }
}
