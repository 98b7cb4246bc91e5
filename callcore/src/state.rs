//! Call state machine implementation.

use crate::types::call::{
    CallDirection, CallOutcome, EndReason, MediaKind, ParticipantId, RejectCode, SessionId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a [`CallSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum CallState {
    /// No call; also the state a session returns to after cleanup.
    #[default]
    Idle,
    OutgoingRinging,
    IncomingRinging,
    /// Accepted; local media and the peer connection are being set up.
    Connecting,
    Active,
    Ended(EndReason),
}

impl CallState {
    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::OutgoingRinging | Self::IncomingRinging)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended(_))
    }

    /// States in which the local media handle may be live.
    pub fn holds_media(&self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        match self {
            Self::Ended(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::OutgoingRinging => f.write_str("outgoing-ringing"),
            Self::IncomingRinging => f.write_str("incoming-ringing"),
            Self::Connecting => f.write_str("connecting"),
            Self::Active => f.write_str("active"),
            Self::Ended(reason) => write!(f, "ended({reason})"),
        }
    }
}

/// Inputs that move a session through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    LocalStart,
    IncomingOffer,
    RemoteAccepted,
    LocalAccepted,
    LocalCancelled,
    LocalRejected,
    RemoteRejected { code: RejectCode },
    /// Caller hung up before we answered.
    RemoteCancelled,
    RingTimeout,
    NegotiationConnected,
    NegotiationFailed,
    MediaDenied,
    LocalEnded,
    RemoteEnded,
    ConnectionLost,
    ChannelDisconnected,
    CleanupDone,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {attempted:?} in state {current}")]
pub struct InvalidTransition {
    pub current: CallState,
    pub attempted: CallTransition,
}

/// The single authoritative record of one call attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub id: SessionId,
    pub local_participant: ParticipantId,
    pub remote_participant: ParticipantId,
    pub direction: CallDirection,
    pub media_kind: MediaKind,
    pub state: CallState,
    pub initiated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    pub outcome: Option<CallOutcome>,
    /// Number of transitions applied so far.
    pub sequence: u32,
}

impl CallSession {
    fn new(
        id: SessionId,
        local_participant: ParticipantId,
        remote_participant: ParticipantId,
        direction: CallDirection,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            id,
            local_participant,
            remote_participant,
            direction,
            media_kind,
            state: CallState::Idle,
            initiated_at: Utc::now(),
            accepted_at: None,
            ended_at: None,
            end_reason: None,
            outcome: None,
            sequence: 0,
        }
    }

    /// A session we are about to place. Starts in `Idle`; apply
    /// [`CallTransition::LocalStart`] to ring.
    pub fn new_outgoing(
        id: SessionId,
        local: ParticipantId,
        remote: ParticipantId,
        media_kind: MediaKind,
    ) -> Self {
        Self::new(id, local, remote, CallDirection::Outgoing, media_kind)
    }

    /// A session offered to us. Starts in `Idle`; apply
    /// [`CallTransition::IncomingOffer`] to ring.
    pub fn new_incoming(
        id: SessionId,
        local: ParticipantId,
        remote: ParticipantId,
        media_kind: MediaKind,
    ) -> Self {
        Self::new(id, local, remote, CallDirection::Incoming, media_kind)
    }

    pub fn is_initiator(&self) -> bool {
        self.direction == CallDirection::Outgoing
    }

    /// Duration from acceptance to end, if the call was ever accepted.
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.accepted_at, self.ended_at) {
            (Some(accepted), Some(ended)) => {
                Some(ended.signed_duration_since(accepted).num_seconds())
            }
            _ => None,
        }
    }

    /// Apply a state transition. Returns the new state, or an error if the
    /// transition is not valid from the current state; the session is left
    /// untouched on error.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<CallState, InvalidTransition> {
        use CallState::*;
        use CallTransition as T;

        let ended = |reason, outcome| (Ended(reason), Some(outcome));

        let (next, outcome) = match (self.state, transition) {
            // A session only ever rings once; cleanup does not make it reusable.
            (Idle, T::LocalStart) if self.is_initiator() && self.sequence == 0 => {
                (OutgoingRinging, None)
            }
            (Idle, T::IncomingOffer) if !self.is_initiator() && self.sequence == 0 => {
                (IncomingRinging, None)
            }

            (OutgoingRinging, T::RemoteAccepted) => (Connecting, None),
            (OutgoingRinging, T::LocalCancelled) => {
                ended(EndReason::Cancelled, CallOutcome::Cancelled)
            }
            (OutgoingRinging, T::RemoteRejected { code }) => match code {
                RejectCode::Busy => ended(EndReason::Rejected, CallOutcome::Busy),
                RejectCode::Timeout => ended(EndReason::Cancelled, CallOutcome::NoAnswer),
                RejectCode::MediaDenied => ended(EndReason::Rejected, CallOutcome::Unavailable),
                RejectCode::Declined | RejectCode::Unknown => {
                    ended(EndReason::Rejected, CallOutcome::Rejected)
                }
            },
            (OutgoingRinging, T::RingTimeout) => {
                ended(EndReason::Cancelled, CallOutcome::NoAnswer)
            }
            // The callee gave up before it ever accepted.
            (OutgoingRinging, T::RemoteEnded) => {
                ended(EndReason::Cancelled, CallOutcome::Cancelled)
            }

            (IncomingRinging, T::LocalAccepted) => (Connecting, None),
            (IncomingRinging, T::LocalRejected) => {
                ended(EndReason::Rejected, CallOutcome::Rejected)
            }
            (IncomingRinging, T::RingTimeout) => ended(EndReason::Missed, CallOutcome::Missed),
            (IncomingRinging, T::RemoteCancelled) => {
                ended(EndReason::Cancelled, CallOutcome::Cancelled)
            }

            (Connecting, T::NegotiationConnected) => (Active, None),
            (Connecting, T::NegotiationFailed) => {
                ended(EndReason::NegotiationFailed, CallOutcome::Failed)
            }
            (Connecting, T::MediaDenied) => {
                ended(EndReason::MediaDenied, CallOutcome::MediaDenied)
            }
            // Callee backing out while its accept-call has not gone out yet.
            (Connecting, T::LocalRejected) if !self.is_initiator() => {
                ended(EndReason::Rejected, CallOutcome::Rejected)
            }
            (Connecting, T::LocalEnded) => ended(EndReason::Completed, CallOutcome::Completed),
            (Connecting, T::RemoteEnded) => ended(EndReason::Cancelled, CallOutcome::Cancelled),

            (Active, T::LocalEnded | T::RemoteEnded) => {
                ended(EndReason::Completed, CallOutcome::Completed)
            }
            (Active, T::ConnectionLost) => {
                ended(EndReason::NetworkLost, CallOutcome::Disconnected)
            }

            (OutgoingRinging | IncomingRinging | Connecting | Active, T::ChannelDisconnected) => {
                ended(EndReason::NetworkLost, CallOutcome::Disconnected)
            }

            (Ended(_), T::CleanupDone) => (Idle, None),

            (current, attempted) => {
                return Err(InvalidTransition { current, attempted });
            }
        };

        match next {
            Connecting => self.accepted_at = Some(Utc::now()),
            Ended(reason) => {
                self.ended_at = Some(Utc::now());
                self.end_reason = Some(reason);
                self.outcome = outcome;
            }
            _ => {}
        }
        self.state = next;
        self.sequence += 1;
        Ok(next)
    }
}
