//! Call-related error types.

use callcore::SessionId;
use thiserror::Error;

/// Errors surfaced by the [`CallManager`](super::CallManager) API.
///
/// Lifecycle failures (denied devices, failed negotiation, dropped channel)
/// never show up here; they end the session and arrive as a terminal
/// state-change notification instead.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("a call session is already in progress: {0}")]
    SessionBusy(SessionId),

    #[error("no local media handle")]
    NoLocalMedia,

    #[error("media device error: {0}")]
    Media(#[from] MediaError),

    #[error("call manager has stopped")]
    ManagerStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission to use the camera or microphone was denied")]
    PermissionDenied,

    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("negotiation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling channel disconnected")]
    ChannelDisconnected,

    #[error("failed to encode signal: {0}")]
    Encode(#[from] serde_json::Error),
}
