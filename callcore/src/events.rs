//! State-change notifications and terminal history records.

use crate::state::{CallSession, CallState};
use crate::types::call::{
    CallDirection, CallOutcome, EndReason, MediaKind, ParticipantId, SessionId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// One entry of the ordered UI notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub session_id: SessionId,
    pub state: CallState,
    /// Set only when `state` is terminal.
    pub reason: Option<EndReason>,
    pub outcome: Option<CallOutcome>,
    /// Per-session, starts at 1 and grows by one per transition.
    pub sequence: u32,
}

impl StateChange {
    pub fn from_session(session: &CallSession) -> Self {
        let terminal = session.state.is_terminal();
        Self {
            session_id: session.id.clone(),
            state: session.state,
            reason: session.state.end_reason(),
            outcome: if terminal { session.outcome } else { None },
            sequence: session.sequence,
        }
    }
}

/// What the call-history recorder receives, once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallHistoryRecord {
    pub call_id: SessionId,
    pub participants: (ParticipantId, ParticipantId),
    pub direction: CallDirection,
    pub media_kind: MediaKind,
    pub initiated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub outcome: Option<CallOutcome>,
}

impl CallHistoryRecord {
    /// Returns `None` until the session has ended.
    pub fn from_session(session: &CallSession) -> Option<Self> {
        Some(Self {
            call_id: session.id.clone(),
            participants: (
                session.local_participant.clone(),
                session.remote_participant.clone(),
            ),
            direction: session.direction,
            media_kind: session.media_kind,
            initiated_at: session.initiated_at,
            accepted_at: session.accepted_at,
            ended_at: session.ended_at?,
            end_reason: session.end_reason?,
            outcome: session.outcome,
        })
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.accepted_at
            .map(|accepted| self.ended_at.signed_duration_since(accepted).num_seconds())
    }
}

pub trait NotificationHandler: Send + Sync {
    fn handle_state_change(&self, change: &StateChange);
}

/// Synchronous fan-out of state changes.
///
/// Handlers run on the dispatching thread, in registration order, so a
/// single dispatcher yields a totally ordered stream for every handler.
#[derive(Default, Clone)]
pub struct NotificationBus {
    handlers: Arc<RwLock<Vec<Arc<dyn NotificationHandler>>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn NotificationHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    /// Returns true if there are any handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, change: &StateChange) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_state_change(change);
        }
    }
}
