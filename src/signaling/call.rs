//! Call handles exchanged through the rendezvous service

use tokio::sync::oneshot;

use crate::errors::{Result, SessionError};
use crate::media::MediaHandle;

/// Reply a callee sends back to the caller
pub(crate) type Answer = std::result::Result<MediaHandle, String>;

/// A connection offer delivered to the registered identifier
pub struct InboundCall {
    caller: String,
    offered: MediaHandle,
    reply: oneshot::Sender<Answer>,
}

impl InboundCall {
    pub(crate) fn new(caller: String, offered: MediaHandle, reply: oneshot::Sender<Answer>) -> Self {
        Self {
            caller,
            offered,
            reply,
        }
    }

    pub fn caller(&self) -> &str {
        &self.caller
    }

    /// Answer with our local stream; returns the caller's stream.
    pub fn answer(self, local: &MediaHandle) -> Result<MediaHandle> {
        if !self.offered.is_live() {
            return Err(SessionError::Negotiation(format!(
                "caller {} stopped its stream before the answer",
                self.caller
            )));
        }
        self.reply.send(Ok(local.remote_view())).map_err(|_| {
            SessionError::Negotiation(format!("caller {} hung up before the answer", self.caller))
        })?;
        Ok(self.offered)
    }

    /// Decline the call; the caller's negotiation fails with `reason`.
    pub fn reject(self, reason: impl Into<String>) {
        let reason = reason.into();
        log::info!("Rejecting call from {}: {}", self.caller, reason);
        self.offered.stop();
        let _ = self.reply.send(Err(reason));
    }
}

impl std::fmt::Debug for InboundCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundCall")
            .field("caller", &self.caller)
            .field("offered", &self.offered)
            .finish()
    }
}

/// A call we placed, waiting for the callee's answer
#[derive(Debug)]
pub struct OutboundCall {
    callee: String,
    answer: oneshot::Receiver<Answer>,
}

impl OutboundCall {
    pub(crate) fn new(callee: String, answer: oneshot::Receiver<Answer>) -> Self {
        Self { callee, answer }
    }

    pub fn callee(&self) -> &str {
        &self.callee
    }

    /// Wait for the callee's stream.
    pub async fn remote_stream(self) -> Result<MediaHandle> {
        match self.answer.await {
            Ok(Ok(remote)) => Ok(remote),
            Ok(Err(reason)) => Err(SessionError::Negotiation(format!(
                "{} declined the call: {}",
                self.callee, reason
            ))),
            Err(_) => Err(SessionError::Negotiation(format!(
                "{} went away before answering",
                self.callee
            ))),
        }
    }
}

/// Connected pair of call handles, for rendezvous implementations
pub fn call_pair(caller: &str, callee: &str, offered: &MediaHandle) -> (InboundCall, OutboundCall) {
    let (reply, answer) = oneshot::channel();
    (
        InboundCall::new(caller.to_string(), offered.remote_view(), reply),
        OutboundCall::new(callee.to_string(), answer),
    )
}
