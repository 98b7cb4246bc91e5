//! Local capture devices.

use super::error::MediaError;
use async_trait::async_trait;
use callcore::{CameraFacing, MediaKind};

/// A live capture stream. While one exists the device indicator is on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle {
    pub id: u64,
    pub kind: MediaKind,
    pub facing: CameraFacing,
}

/// Boundary to the platform media-capture API.
///
/// The controller exclusively owns every handle it returns; the call manager
/// only borrows one for lifecycle commands.
#[async_trait]
pub trait MediaDeviceController: Send + Sync {
    /// Pre-warm devices for a call about to ring. Must not turn the indicator on.
    fn reserve(&self, _kind: MediaKind) {}

    /// Drop whatever [`reserve`](Self::reserve) prepared. Safe without a reservation.
    fn cancel_reservation(&self) {}

    async fn acquire(
        &self,
        kind: MediaKind,
        facing: CameraFacing,
    ) -> Result<MediaHandle, MediaError>;

    /// Idempotent; releasing an already-released handle is a no-op.
    fn release(&self, handle: &MediaHandle);

    fn set_muted(&self, handle: &MediaHandle, muted: bool) -> Result<(), MediaError>;

    fn set_video_enabled(&self, handle: &MediaHandle, enabled: bool) -> Result<(), MediaError>;

    /// Release `handle` and reacquire with the opposite facing. On error the
    /// old handle must still be live.
    async fn switch_facing(&self, handle: &MediaHandle) -> Result<MediaHandle, MediaError>;
}

/// The borrowed handle plus the toggles the user has applied to it.
#[derive(Debug, Clone)]
pub(crate) struct LocalMedia {
    pub handle: MediaHandle,
    pub muted: bool,
    pub video_enabled: bool,
}

impl LocalMedia {
    pub fn new(handle: MediaHandle) -> Self {
        let video_enabled = handle.kind.is_video();
        Self {
            handle,
            muted: false,
            video_enabled,
        }
    }
}
