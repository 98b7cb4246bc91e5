//! One-to-one call coordination.
//!
//! # Architecture
//!
//! - [`CallManager`]: actor that owns the single live [`CallSession`] and
//!   serializes every event that can change it
//! - [`MediaDeviceController`]: local camera/microphone boundary
//! - [`NegotiationEngine`]: peer connection boundary
//! - [`RingFeedback`]: ring-out/ring-in tones in lockstep with the session
//! - [`SignalingChannel`]: outbound half of the signaling transport
//! - [`CallHistoryRecorder`]: receives one record per finished call
//!
//! [`CallSession`]: callcore::CallSession

mod error;
mod history;
mod manager;
mod media;
mod messages;
mod negotiation;
mod ring;
mod signaling;

pub use error::{CallError, MediaError, NegotiationError, SignalingError};
pub use history::{CallHistoryRecorder, InMemoryCallHistory};
pub use manager::{CallDependencies, CallManager};
pub use media::{MediaDeviceController, MediaHandle};
pub use negotiation::{NegotiationEngine, NegotiationEvent, NegotiationObserver, RemoteDescriptor};
pub use ring::{LogTonePlayer, RingFeedback, Tone, TonePlayer};
pub use signaling::{JsonSignalingChannel, SignalingChannel, TransportFrame, pump_frames};
