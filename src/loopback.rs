//! In-process stand-in for the signaling service.
//!
//! Routes each participant's outbound signals to the other party of the call
//! as the matching inbound event. Deliveries can be held back and released
//! together to stage simultaneous arrivals.

use crate::calls::{CallManager, SignalingChannel, SignalingError};
use async_trait::async_trait;
use callcore::{InboundSignal, OutboundSignal, ParticipantId, SessionId};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RelayState {
    peers: HashMap<ParticipantId, CallManager>,
    /// call id -> (caller, callee)
    calls: HashMap<SessionId, (ParticipantId, ParticipantId)>,
    offline: HashSet<ParticipantId>,
    holding: bool,
    held: Vec<(ParticipantId, InboundSignal)>,
}

#[derive(Clone, Default)]
pub struct LoopbackRelay {
    state: Arc<Mutex<RelayState>>,
}

impl LoopbackRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel `participant` sends through. Attach its manager before
    /// anything is routed to it.
    pub fn channel_for(&self, participant: ParticipantId) -> LoopbackChannel {
        LoopbackChannel {
            relay: self.clone(),
            participant,
        }
    }

    pub fn attach(&self, manager: CallManager) {
        let participant = manager.local_participant().clone();
        self.lock().peers.insert(participant, manager);
    }

    /// Calls the relay still routes for. A call stops being routed once
    /// either side rejects or ends it.
    pub fn tracked_calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// Queue deliveries until [`flush`](Self::flush).
    pub fn hold(&self) {
        self.lock().holding = true;
    }

    /// Deliver everything held, in order, and stop holding.
    pub fn flush(&self) {
        let held = {
            let mut state = self.lock();
            state.holding = false;
            std::mem::take(&mut state.held)
        };
        for (to, signal) in held {
            self.deliver(&to, signal);
        }
    }

    /// Drop `participant`'s socket: its sends fail and it is told the channel
    /// went away.
    pub fn disconnect(&self, participant: &ParticipantId) {
        let manager = {
            let mut state = self.lock();
            state.offline.insert(participant.clone());
            state.peers.get(participant).cloned()
        };
        if let Some(manager) = manager
            && manager.channel_disconnected().is_err()
        {
            debug!(target: "Calls/Loopback", "{participant} already stopped");
        }
    }

    pub fn reconnect(&self, participant: &ParticipantId) {
        let manager = {
            let mut state = self.lock();
            state.offline.remove(participant);
            state.peers.get(participant).cloned()
        };
        if let Some(manager) = manager
            && manager.channel_connected().is_err()
        {
            debug!(target: "Calls/Loopback", "{participant} already stopped");
        }
    }

    fn route(&self, from: &ParticipantId, signal: OutboundSignal) -> Result<(), SignalingError> {
        let (to, inbound) = {
            let mut state = self.lock();
            if state.offline.contains(from) {
                return Err(SignalingError::ChannelDisconnected);
            }
            match signal {
                OutboundSignal::CallUser {
                    to,
                    from,
                    call_id,
                    media_kind,
                } => {
                    state
                        .calls
                        .insert(call_id.clone(), (from.clone(), to.clone()));
                    let inbound = InboundSignal::IncomingCall {
                        from,
                        call_id,
                        media_kind,
                    };
                    (to, inbound)
                }
                OutboundSignal::AcceptCall { call_id, from } => {
                    let Some(to) = state.other_party(&call_id, &from) else {
                        return Ok(());
                    };
                    (to, InboundSignal::CallAccepted { call_id })
                }
                OutboundSignal::RejectCall {
                    call_id,
                    from,
                    reason_code,
                } => {
                    let Some(to) = state.other_party(&call_id, &from) else {
                        return Ok(());
                    };
                    state.calls.remove(&call_id);
                    (
                        to,
                        InboundSignal::CallRejected {
                            call_id,
                            reason_code,
                        },
                    )
                }
                OutboundSignal::CallEnded { call_id, from } => {
                    let Some(to) = state.other_party(&call_id, &from) else {
                        return Ok(());
                    };
                    state.calls.remove(&call_id);
                    (to, InboundSignal::CallEnded { call_id })
                }
            }
        };

        {
            let mut state = self.lock();
            if state.holding {
                debug!(target: "Calls/Loopback", "Holding {} for {to}", inbound.event_name());
                state.held.push((to, inbound));
                return Ok(());
            }
        }
        self.deliver(&to, inbound);
        Ok(())
    }

    fn deliver(&self, to: &ParticipantId, signal: InboundSignal) {
        let manager = {
            let state = self.lock();
            if state.offline.contains(to) {
                debug!(target: "Calls/Loopback", "{to} is offline, dropping {}", signal.event_name());
                return;
            }
            state.peers.get(to).cloned()
        };
        match manager {
            Some(manager) => {
                debug!(target: "Calls/Loopback", "{} -> {to}", signal.event_name());
                if manager.deliver(signal).is_err() {
                    debug!(target: "Calls/Loopback", "{to} already stopped");
                }
            }
            None => warn!(target: "Calls/Loopback", "No participant {to}, dropping {}", signal.event_name()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
        self.state.lock().expect("Mutex should not be poisoned")
    }
}

impl RelayState {
    fn other_party(&self, call_id: &SessionId, from: &ParticipantId) -> Option<ParticipantId> {
        match self.calls.get(call_id) {
            Some((caller, callee)) if caller == from => Some(callee.clone()),
            Some((caller, _)) => Some(caller.clone()),
            None => {
                debug!(target: "Calls/Loopback", "Call {call_id} from {from} is already over");
                None
            }
        }
    }
}

/// One participant's end of a [`LoopbackRelay`].
#[derive(Clone)]
pub struct LoopbackChannel {
    relay: LoopbackRelay,
    participant: ParticipantId,
}

#[async_trait]
impl SignalingChannel for LoopbackChannel {
    async fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        self.relay.route(&self.participant, signal)
    }
}
