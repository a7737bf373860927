// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! ```text
//! ┌──────────────────────────────┐
//! │         Orchestrator         │
//! └──────────────┬───────────────┘
//!                │ open_device / create_session
//!                ▼
//! ┌──────────────────────────────┐
//! │ CaptureDeviceSessionManager  │  ← device state, one live session per device
//! └──────────────┬───────────────┘
//!                │
//!                ▼
//! ┌──────────────────────────────┐
//! │     CaptureService trait     │  ← platform seam
//! └──────┬───────────────┬───────┘
//!        ▼               ▼
//!    ┌──────┐      ┌──────────┐
//!    │ V4L2 │      │ Virtual  │
//!    └──────┘      └──────────┘
//! ```
//!
//! Platform callbacks arrive on a thread owned by each opened device, never on
//! the async runtime.

pub mod frame_loop;
pub mod session_manager;
pub mod types;
pub mod v4l2;

pub use session_manager::{CaptureDeviceSessionManager, CaptureSession, DeviceEvent, DeviceHandle};
pub use types::*;

use crate::errors::CameraError;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Asynchronous notifications a platform device raises after `open`
pub enum PlatformEvent {
    Opened(Arc<dyn PlatformDevice>),
    Disconnected,
    Error(CameraError),
}

impl std::fmt::Debug for PlatformEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            PlatformEvent::Disconnected => write!(f, "Disconnected"),
            PlatformEvent::Error(e) => write!(f, "Error({})", e),
        }
    }
}

pub type PlatformEventSender = mpsc::UnboundedSender<PlatformEvent>;

/// Confirmation channel for an asynchronous session configuration
pub type SessionReply = oneshot::Receiver<BackendResult<Box<dyn PlatformSession>>>;

/// Entry point to a camera platform
pub trait CaptureService: Send + Sync {
    fn backend_type(&self) -> CameraBackendType;

    /// List capture devices with their facing and zoom range
    fn enumerate_devices(&self) -> BackendResult<Vec<CameraDescriptor>>;

    /// Start opening a device
    ///
    /// The outcome arrives on `events`: `Opened`, then at most one of
    /// `Disconnected` or `Error` for the rest of the device's life.
    fn open(&self, id: &DeviceId, events: PlatformEventSender);
}

/// An opened capture device
pub trait PlatformDevice: Send + Sync {
    fn id(&self) -> &DeviceId;

    /// Configure a capture session rendering into `outputs`
    ///
    /// Supersedes any session the device already has. The reply resolves once
    /// the device accepts or rejects the configuration.
    fn create_session(&self, outputs: Vec<OutputSurface>, profile: ColorProfile) -> SessionReply;

    /// Release the device
    fn close(&self);
}

/// A configured capture session on one device
pub trait PlatformSession: Send + Sync {
    /// Replace the standing request frames are produced with
    fn set_repeating(&self, request: &CaptureRequest) -> BackendResult<()>;

    /// Issue a single request on top of the standing one
    fn capture(&self, request: &CaptureRequest) -> BackendResult<()>;

    fn close(&self);
}

/// Pick one descriptor per facing
///
/// An explicit device id wins; otherwise the first device reporting the facing.
pub fn select_pair(
    devices: &[CameraDescriptor],
    front: Option<&DeviceId>,
    back: Option<&DeviceId>,
) -> BackendResult<(CameraDescriptor, CameraDescriptor)> {
    let pick = |facing: CameraFacing, wanted: Option<&DeviceId>| {
        let found = match wanted {
            Some(id) => devices.iter().find(|d| &d.id == id),
            None => devices.iter().find(|d| d.facing == facing),
        };
        found
            .cloned()
            .ok_or_else(|| CameraError::DeviceNotFound(format!("{} camera", facing)))
    };

    let front = pick(CameraFacing::Front, front)?;
    let back = pick(CameraFacing::Back, back)?;
    if front.id == back.id {
        return Err(CameraError::DeviceNotFound(format!(
            "a second camera besides {}",
            front.id
        )));
    }
    Ok((front, back))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, facing: CameraFacing) -> CameraDescriptor {
        CameraDescriptor {
            id: DeviceId::new(id),
            name: id.to_string(),
            facing,
            zoom_range: ZoomRange::default(),
            resolutions: vec![Resolution::new(640, 480)],
        }
    }

    #[test]
    fn test_select_pair_by_facing() {
        let devices = vec![
            descriptor("rear", CameraFacing::Back),
            descriptor("selfie", CameraFacing::Front),
        ];
        let (front, back) = select_pair(&devices, None, None).unwrap();
        assert_eq!(front.id.as_str(), "selfie");
        assert_eq!(back.id.as_str(), "rear");
    }

    #[test]
    fn test_select_pair_explicit_ids() {
        let devices = vec![
            descriptor("a", CameraFacing::Front),
            descriptor("b", CameraFacing::Front),
        ];
        let back = DeviceId::new("b");
        let (front, back) = select_pair(&devices, None, Some(&back)).unwrap();
        assert_eq!(front.id.as_str(), "a");
        assert_eq!(back.id.as_str(), "b");
    }

    #[test]
    fn test_select_pair_missing_facing() {
        let devices = vec![descriptor("only", CameraFacing::Front)];
        let err = select_pair(&devices, None, None).unwrap_err();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
