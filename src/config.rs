use callcore::{CallDirection, CameraFacing};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the call manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallManagerConfig {
    /// Ring window in seconds before an unanswered call gives up.
    pub ring_timeout_secs: u64,
    /// Extra seconds the caller waits beyond the ring window, so the callee's
    /// own timeout normally ends the call first.
    pub outgoing_ring_grace_secs: u64,
    /// Bound in seconds on media acquisition plus negotiation.
    pub connect_timeout_secs: u64,
    /// Camera used when acquiring video.
    pub default_facing: CameraFacing,
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 45,
            outgoing_ring_grace_secs: 5,
            connect_timeout_secs: 30,
            default_facing: CameraFacing::Front,
        }
    }
}

impl CallManagerConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn ring_window(&self, direction: CallDirection) -> Duration {
        match direction {
            CallDirection::Incoming => Duration::from_secs(self.ring_timeout_secs),
            CallDirection::Outgoing => {
                Duration::from_secs(self.ring_timeout_secs + self.outgoing_ring_grace_secs)
            }
        }
    }

    pub fn connect_window(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
