use super::error::{CallError, MediaError};
use super::media::MediaHandle;
use super::negotiation::NegotiationEvent;
use callcore::{CallSession, CameraFacing, InboundSignal, MediaKind, ParticipantId, SessionId};
use tokio::sync::oneshot;

// --- Commands from the CallManager handle to the actor ---
#[derive(Debug)]
pub enum ManagerCommand {
    StartCall {
        remote: ParticipantId,
        media_kind: MediaKind,
        reply: oneshot::Sender<Result<SessionId, CallError>>,
    },
    AcceptIncoming {
        reply: oneshot::Sender<()>,
    },
    RejectIncoming {
        reply: oneshot::Sender<()>,
    },
    CancelOutgoing {
        reply: oneshot::Sender<()>,
    },
    EndActive {
        reply: oneshot::Sender<()>,
    },
    ToggleMute {
        reply: oneshot::Sender<Result<bool, CallError>>,
    },
    ToggleVideo {
        reply: oneshot::Sender<Result<bool, CallError>>,
    },
    SwitchCamera {
        reply: oneshot::Sender<Result<CameraFacing, CallError>>,
    },
    Inbound(InboundSignal),
    ChannelDisconnected,
    ChannelConnected,
    Snapshot {
        reply: oneshot::Sender<Option<CallSession>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// --- Completions the actor schedules for itself ---
#[derive(Debug)]
pub enum InternalEvent {
    MediaAcquired {
        session_id: SessionId,
        result: Result<MediaHandle, MediaError>,
    },
    Negotiation {
        session_id: SessionId,
        event: NegotiationEvent,
    },
    RingTimeout {
        session_id: SessionId,
    },
    ConnectTimeout {
        session_id: SessionId,
    },
}
