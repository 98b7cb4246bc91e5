//! Signaling transport adapter.
//!
//! The manager talks to the counterpart service through [`SignalingChannel`].
//! [`JsonSignalingChannel`] turns outbound signals into text frames for a
//! socket writer, and [`pump_frames`] feeds a socket reader back into the
//! manager.

use super::error::{CallError, SignalingError};
use super::manager::CallManager;
use async_trait::async_trait;
use callcore::{InboundSignal, OutboundSignal};
use log::{debug, warn};
use tokio::sync::mpsc;

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError>;
}

/// What a socket reader hands up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Opened,
    Closed,
}

/// Encodes outbound signals to JSON text frames.
#[derive(Debug, Clone)]
pub struct JsonSignalingChannel {
    frames: mpsc::UnboundedSender<String>,
}

impl JsonSignalingChannel {
    /// Returns the channel and the receiving end the socket writer drains.
    pub fn open() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (frames, rx) = mpsc::unbounded_channel();
        (Self { frames }, rx)
    }
}

#[async_trait]
impl SignalingChannel for JsonSignalingChannel {
    async fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        let text = signal.encode()?;
        debug!(target: "Calls/Signaling", "--> {text}");
        self.frames
            .send(text)
            .map_err(|_| SignalingError::ChannelDisconnected)
    }
}

/// Decode transport frames into manager calls until the transport or the
/// manager goes away. Undecodable frames are logged and dropped.
pub async fn pump_frames(mut frames: mpsc::UnboundedReceiver<TransportFrame>, manager: CallManager) {
    while let Some(frame) = frames.recv().await {
        let delivered: Result<(), CallError> = match frame {
            TransportFrame::Text(text) => match InboundSignal::decode(&text) {
                Ok(signal) => {
                    debug!(target: "Calls/Signaling", "<-- {}", signal.event_name());
                    manager.deliver(signal)
                }
                Err(e) => {
                    warn!(target: "Calls/Signaling", "Dropping undecodable frame: {e}");
                    continue;
                }
            },
            TransportFrame::Opened => manager.channel_connected(),
            TransportFrame::Closed => manager.channel_disconnected(),
        };
        if delivered.is_err() {
            debug!(target: "Calls/Signaling", "Manager stopped, no longer pumping frames");
            break;
        }
    }
}
