// SPDX-License-Identifier: GPL-3.0-only

//! Per-device zoom state and the loops that push it into capture requests

use crate::backends::camera::{CameraFacing, CaptureSession, ZoomRange};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceZoom {
    pub range: ZoomRange,
    pub current: f32,
}

impl DeviceZoom {
    pub fn new(range: ZoomRange) -> Self {
        Self {
            range,
            current: range.clamp(1.0),
        }
    }
}

impl Default for DeviceZoom {
    fn default() -> Self {
        Self::new(ZoomRange::default())
    }
}

/// Zoom of both cameras
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZoomState {
    pub front: DeviceZoom,
    pub back: DeviceZoom,
}

impl ZoomState {
    pub fn get(&self, facing: CameraFacing) -> DeviceZoom {
        match facing {
            CameraFacing::Front => self.front,
            CameraFacing::Back => self.back,
        }
    }

    fn slot(&mut self, facing: CameraFacing) -> &mut DeviceZoom {
        match facing {
            CameraFacing::Front => &mut self.front,
            CameraFacing::Back => &mut self.back,
        }
    }

    /// Set a device's zoom, clamped to its range; returns the applied value
    pub fn set(&mut self, facing: CameraFacing, value: f32) -> f32 {
        let zoom = self.slot(facing);
        zoom.current = zoom.range.clamp(value);
        zoom.current
    }

    /// Adopt a newly opened device's range, keeping the current ratio if it fits
    pub fn set_range(&mut self, facing: CameraFacing, range: ZoomRange) {
        let zoom = self.slot(facing);
        zoom.range = range;
        zoom.current = range.clamp(zoom.current);
    }
}

/// Reissue `session`'s standing request whenever `facing`'s zoom differs
/// from `applied`, the ratio the session was configured with
///
/// Each device gets its own loop so the two never wait on each other. The
/// loop ends when the state channel closes, the session closes, or the
/// returned handle is aborted.
pub fn spawn_zoom_loop(
    facing: CameraFacing,
    session: CaptureSession,
    mut zoom: watch::Receiver<ZoomState>,
    mut applied: f32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            // Compare before waiting: a change may have landed after `applied` was read
            let value = zoom.borrow_and_update().get(facing).current;
            if value != applied {
                if session.is_closed() {
                    break;
                }
                match session.update_zoom(value) {
                    Ok(()) => {
                        debug!(%facing, zoom = value, "Zoom applied");
                        applied = value;
                    }
                    Err(e) => {
                        warn!(%facing, error = %e, "Failed to apply zoom");
                        break;
                    }
                }
            }
            if zoom.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{
        CaptureDeviceSessionManager, CaptureRequest, ColorProfile, DeviceEvent, DeviceId,
        FrameConsumer, FrameImage, OutputSurface, RequestTemplate, Resolution,
    };
    use crate::backends::virtual_camera::{VirtualCamera, VirtualCaptureService};
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;

    struct IgnoredOutput;

    impl FrameConsumer for IgnoredOutput {
        fn buffer_size(&self) -> Resolution {
            Resolution::new(8, 4)
        }

        fn queue_frame(&self, _frame: FrameImage) {}

        fn is_released(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_set_clamps_to_range() {
        let mut state = ZoomState::default();
        state.set_range(CameraFacing::Back, ZoomRange::new(1.0, 4.0));
        assert_eq!(state.set(CameraFacing::Back, 10.0), 4.0);
        assert_eq!(state.set(CameraFacing::Back, 0.2), 1.0);
        assert_eq!(state.set(CameraFacing::Back, f32::NAN), 1.0);
        assert_eq!(state.set(CameraFacing::Back, 2.5), 2.5);
        // Front still has the degenerate default range
        assert_eq!(state.set(CameraFacing::Front, 3.0), 1.0);
    }

    #[test]
    fn test_set_range_keeps_fitting_value() {
        let mut state = ZoomState::default();
        state.set_range(CameraFacing::Front, ZoomRange::new(0.5, 8.0));
        state.set(CameraFacing::Front, 6.0);
        state.set_range(CameraFacing::Front, ZoomRange::new(1.0, 4.0));
        assert_eq!(state.front.current, 4.0);
    }

    #[test]
    fn test_new_device_zoom_starts_at_one_when_possible() {
        assert_eq!(DeviceZoom::new(ZoomRange::new(0.6, 10.0)).current, 1.0);
        assert_eq!(DeviceZoom::new(ZoomRange::new(2.0, 10.0)).current, 2.0);
    }

    #[tokio::test]
    async fn test_loop_applies_change_seen_before_it_started() {
        let service = Arc::new(VirtualCaptureService::new(vec![
            VirtualCamera::new("cam", CameraFacing::Back, [0, 0, 0, 255])
                .with_zoom_range(ZoomRange::new(1.0, 8.0)),
        ]));
        let stats = service.stats();
        let manager = CaptureDeviceSessionManager::new(service);
        let id = DeviceId::new("cam");

        let mut events = Box::pin(manager.open_device(id.clone()));
        let Some(DeviceEvent::Open(handle)) = events.next().await else {
            panic!("camera did not open");
        };
        let output: OutputSurface = Arc::new(IgnoredOutput);
        let session = manager
            .create_session(&handle, vec![output], ColorProfile::Standard)
            .await
            .unwrap();
        session
            .set_repeating(CaptureRequest::repeating(RequestTemplate::Preview, 1.0, 30))
            .unwrap();

        // The receiver already saw 3x, but the session still runs at 1x
        let mut state = ZoomState::default();
        state.set_range(CameraFacing::Back, ZoomRange::new(1.0, 8.0));
        let (tx, mut rx) = watch::channel(state);
        tx.send_modify(|zoom| {
            zoom.set(CameraFacing::Back, 3.0);
        });
        let seen = rx.borrow_and_update().get(CameraFacing::Back).current;
        assert_eq!(seen, 3.0);

        let zoom_loop = spawn_zoom_loop(CameraFacing::Back, session.clone(), rx, 1.0);

        let mut applied = None;
        for _ in 0..100 {
            applied = stats.last_zoom(&id);
            if applied == Some(3.0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(applied, Some(3.0));

        zoom_loop.abort();
        session.close();
    }
}
