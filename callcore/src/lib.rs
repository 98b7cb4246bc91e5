//! Runtime-free core of the call session coordinator: identifiers, the
//! session state machine, the signaling wire contract and the notification
//! types. Nothing here spawns tasks or touches devices.

pub mod events;
pub mod signaling;
pub mod state;
pub mod types;

pub use events::{CallHistoryRecord, NotificationBus, NotificationHandler, StateChange};
pub use signaling::{InboundSignal, OutboundSignal};
pub use state::{CallSession, CallState, CallTransition, InvalidTransition};
pub use types::call::{
    CallDirection, CallOutcome, CameraFacing, EndReason, MediaKind, ParticipantId, RejectCode,
    SessionId,
};
