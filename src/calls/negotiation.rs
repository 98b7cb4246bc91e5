//! Peer connection boundary.
//!
//! The manager starts and stops the engine and listens for exactly three
//! outcomes; it never looks at SDP or ICE content.

use super::error::NegotiationError;
use super::media::MediaHandle;
use super::messages::InternalEvent;
use async_trait::async_trait;
use callcore::{MediaKind, ParticipantId, SessionId};
use log::debug;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationEvent {
    Connected,
    Failed(NegotiationError),
    ConnectionLost,
}

/// What the engine needs to know about the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub call_id: SessionId,
    pub remote: ParticipantId,
    pub media_kind: MediaKind,
    /// True when the local side placed the call.
    pub initiator: bool,
}

/// Handed to the engine on start; reports back into the manager's queue.
///
/// Reports carry the session id, so anything an engine says after the
/// session has moved on is discarded by the manager.
#[derive(Debug, Clone)]
pub struct NegotiationObserver {
    session_id: SessionId,
    events: mpsc::UnboundedSender<InternalEvent>,
}

impl NegotiationObserver {
    pub(crate) fn new(session_id: SessionId, events: mpsc::UnboundedSender<InternalEvent>) -> Self {
        Self { session_id, events }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn connected(&self) {
        self.report(NegotiationEvent::Connected);
    }

    pub fn failed(&self, error: NegotiationError) {
        self.report(NegotiationEvent::Failed(error));
    }

    pub fn connection_lost(&self) {
        self.report(NegotiationEvent::ConnectionLost);
    }

    fn report(&self, event: NegotiationEvent) {
        let sent = self.events.send(InternalEvent::Negotiation {
            session_id: self.session_id.clone(),
            event,
        });
        if sent.is_err() {
            debug!(target: "Calls/Manager", "Negotiation report for {} after manager stopped", self.session_id);
        }
    }
}

#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    /// Begin connecting. Returning `Ok` means negotiation is under way; the
    /// result arrives later through `observer`.
    async fn start(
        &self,
        local: &MediaHandle,
        remote: &RemoteDescriptor,
        observer: NegotiationObserver,
    ) -> Result<(), NegotiationError>;

    /// Swap the outgoing tracks after a camera switch.
    fn replace_local(&self, _call_id: &SessionId, _local: &MediaHandle) {}

    fn stop(&self, call_id: &SessionId);
}
