//! Signaling wire contract.
//!
//! Every message is a named event carried as JSON:
//! `{"event":"call-user","data":{"to":"u2","from":"u1","callId":"…","mediaKind":"video"}}`.
//! Event names are kebab-case, payload fields camelCase.

use crate::types::call::{MediaKind, ParticipantId, RejectCode, SessionId};
use serde::{Deserialize, Serialize};

/// Messages the coordinator emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum OutboundSignal {
    CallUser {
        to: ParticipantId,
        from: ParticipantId,
        call_id: SessionId,
        media_kind: MediaKind,
    },
    AcceptCall {
        call_id: SessionId,
        from: ParticipantId,
    },
    RejectCall {
        call_id: SessionId,
        from: ParticipantId,
        reason_code: RejectCode,
    },
    CallEnded {
        call_id: SessionId,
        from: ParticipantId,
    },
}

impl OutboundSignal {
    pub fn call_id(&self) -> &SessionId {
        match self {
            Self::CallUser { call_id, .. }
            | Self::AcceptCall { call_id, .. }
            | Self::RejectCall { call_id, .. }
            | Self::CallEnded { call_id, .. } => call_id,
        }
    }

    pub fn from(&self) -> &ParticipantId {
        match self {
            Self::CallUser { from, .. }
            | Self::AcceptCall { from, .. }
            | Self::RejectCall { from, .. }
            | Self::CallEnded { from, .. } => from,
        }
    }

    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::CallUser { .. } => "call-user",
            Self::AcceptCall { .. } => "accept-call",
            Self::RejectCall { .. } => "reject-call",
            Self::CallEnded { .. } => "call-ended",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Messages the coordinator consumes.
///
/// The transport-level `channel-disconnected` event has no payload and is not
/// part of this enum; transports report it out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum InboundSignal {
    IncomingCall {
        from: ParticipantId,
        call_id: SessionId,
        media_kind: MediaKind,
    },
    CallAccepted {
        call_id: SessionId,
    },
    CallRejected {
        call_id: SessionId,
        reason_code: RejectCode,
    },
    CallEnded {
        call_id: SessionId,
    },
}

impl InboundSignal {
    pub fn call_id(&self) -> &SessionId {
        match self {
            Self::IncomingCall { call_id, .. }
            | Self::CallAccepted { call_id }
            | Self::CallRejected { call_id, .. }
            | Self::CallEnded { call_id } => call_id,
        }
    }

    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::IncomingCall { .. } => "incoming-call",
            Self::CallAccepted { .. } => "call-accepted",
            Self::CallRejected { .. } => "call-rejected",
            Self::CallEnded { .. } => "call-ended",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_call_user_wire_shape() {
        let signal = OutboundSignal::CallUser {
            to: "u2".into(),
            from: "u1".into(),
            call_id: "S1".into(),
            media_kind: MediaKind::Video,
        };
        let value: Value = serde_json::from_str(&signal.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "call-user",
                "data": { "to": "u2", "from": "u1", "callId": "S1", "mediaKind": "video" }
            })
        );
        assert_eq!(signal.event_name(), "call-user");
    }

    #[test]
    fn test_reject_call_wire_shape() {
        let signal = OutboundSignal::RejectCall {
            call_id: "S1".into(),
            from: "u2".into(),
            reason_code: RejectCode::MediaDenied,
        };
        let value: Value = serde_json::from_str(&signal.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "reject-call",
                "data": { "callId": "S1", "from": "u2", "reasonCode": "media-denied" }
            })
        );
    }

    #[test]
    fn test_decode_inbound_events() {
        let incoming = InboundSignal::decode(
            r#"{"event":"incoming-call","data":{"from":"u1","callId":"S9","mediaKind":"audio"}}"#,
        )
        .unwrap();
        assert_eq!(
            incoming,
            InboundSignal::IncomingCall {
                from: "u1".into(),
                call_id: "S9".into(),
                media_kind: MediaKind::Audio,
            }
        );

        let rejected = InboundSignal::decode(
            r#"{"event":"call-rejected","data":{"callId":"S9","reasonCode":"busy"}}"#,
        )
        .unwrap();
        assert_eq!(rejected.call_id().as_str(), "S9");
        assert!(matches!(
            rejected,
            InboundSignal::CallRejected {
                reason_code: RejectCode::Busy,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_reason_code_is_tolerated() {
        let rejected = InboundSignal::decode(
            r#"{"event":"call-rejected","data":{"callId":"S9","reasonCode":"dnd"}}"#,
        )
        .unwrap();
        assert!(matches!(
            rejected,
            InboundSignal::CallRejected {
                reason_code: RejectCode::Unknown,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_event_is_an_error() {
        assert!(InboundSignal::decode(r#"{"event":"hold","data":{"callId":"S9"}}"#).is_err());
        assert!(InboundSignal::decode("not json").is_err());
    }
}
