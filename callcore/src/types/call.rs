//! Identifiers and enumerations shared by every layer of the call stack.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque session identifier, assigned by the initiating side.
///
/// Ordering is lexicographic on the string form; glare resolution relies on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random 32-character uppercase hex id.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode_upper(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A user taking part in a call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Audio => "audio",
            Self::Video => "video",
        })
    }
}

/// Which camera a capture handle is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

impl CameraFacing {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

/// Why a session reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    Completed,
    Missed,
    Rejected,
    Cancelled,
    MediaDenied,
    NegotiationFailed,
    NetworkLost,
}

impl EndReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Missed => "missed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::MediaDenied => "media-denied",
            Self::NegotiationFailed => "negotiation-failed",
            Self::NetworkLost => "network-lost",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code carried by `reject-call` / `call-rejected`.
///
/// Unrecognised codes from the wire decode as [`RejectCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectCode {
    Declined,
    Busy,
    Timeout,
    MediaDenied,
    Unknown,
}

impl RejectCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Declined => "declined",
            Self::Busy => "busy",
            Self::Timeout => "timeout",
            Self::MediaDenied => "media-denied",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_wire(code: &str) -> Self {
        match code {
            "declined" => Self::Declined,
            "busy" => Self::Busy,
            "timeout" => Self::Timeout,
            "media-denied" => Self::MediaDenied,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RejectCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RejectCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// User-legible outcome of a finished call.
///
/// Finer-grained than [`EndReason`]: a `rejected` session may be shown as
/// busy or unavailable depending on the remote reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallOutcome {
    Completed,
    Busy,
    Rejected,
    Unavailable,
    Missed,
    NoAnswer,
    Cancelled,
    MediaDenied,
    Failed,
    Disconnected,
}

impl CallOutcome {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed => "Call ended",
            Self::Busy => "Busy",
            Self::Rejected => "Call declined",
            Self::Unavailable => "Unavailable",
            Self::Missed => "Missed call",
            Self::NoAnswer => "No answer",
            Self::Cancelled => "Call cancelled",
            Self::MediaDenied => "Camera or microphone blocked",
            Self::Failed => "Call failed",
            Self::Disconnected => "Connection lost",
        }
    }
}
