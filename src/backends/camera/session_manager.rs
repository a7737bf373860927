// SPDX-License-Identifier: GPL-3.0-only

//! Device lifecycle and capture session bookkeeping
//!
//! The manager provides:
//! - Device open as a stream of [`DeviceEvent`]s; dropping the stream closes the device
//! - Session creation that waits for the device's asynchronous confirmation
//! - At most one live session per device, tracked for diagnostics

use super::types::*;
use super::{CaptureService, PlatformDevice, PlatformEvent, PlatformSession};
use crate::constants::timing::SESSION_CONFIGURE_TIMEOUT;
use crate::errors::CameraError;
use futures::Stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events observed while a device is held open
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Open(DeviceHandle),
    Disconnected,
    Error(CameraError),
}

/// An opened device, valid until its event stream is dropped
#[derive(Clone)]
pub struct DeviceHandle {
    id: DeviceId,
    device: Arc<dyn PlatformDevice>,
}

impl DeviceHandle {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle").field("id", &self.id).finish()
    }
}

#[derive(Default)]
struct ManagerState {
    devices: HashMap<DeviceId, DeviceState>,
    sessions: HashMap<DeviceId, Arc<SessionInner>>,
    next_serial: u64,
}

/// Opens capture devices and creates capture sessions on them
///
/// Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct CaptureDeviceSessionManager {
    service: Arc<dyn CaptureService>,
    state: Arc<Mutex<ManagerState>>,
}

impl CaptureDeviceSessionManager {
    pub fn new(service: Arc<dyn CaptureService>) -> Self {
        info!(backend = %service.backend_type(), "Creating capture session manager");
        Self {
            service,
            state: Arc::new(Mutex::new(ManagerState::default())),
        }
    }

    pub fn backend_type(&self) -> CameraBackendType {
        self.service.backend_type()
    }

    pub fn enumerate_devices(&self) -> BackendResult<Vec<CameraDescriptor>> {
        self.service.enumerate_devices()
    }

    pub fn device_state(&self, id: &DeviceId) -> DeviceState {
        self.lock()
            .devices
            .get(id)
            .copied()
            .unwrap_or(DeviceState::Closed)
    }

    /// Number of sessions that are configured and not yet closed
    pub fn live_session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Open a device
    ///
    /// The stream yields `Open` once the platform reports it, then ends after
    /// the first `Disconnected` or `Error`. Dropping the stream closes the
    /// device and any session still live on it.
    pub fn open_device(&self, id: DeviceId) -> impl Stream<Item = DeviceEvent> + Send + 'static {
        let manager = self.clone();
        async_stream::stream! {
            let (tx, mut rx) = mpsc::unbounded_channel();
            manager.set_device_state(&id, DeviceState::Opening);
            info!(device = %id, "Opening capture device");
            manager.service.open(&id, tx);

            let mut lease = DeviceLease {
                manager: manager.clone(),
                id: id.clone(),
                device: None,
            };

            while let Some(event) = rx.recv().await {
                match event {
                    PlatformEvent::Opened(device) => {
                        info!(device = %id, "Capture device open");
                        manager.set_device_state(&id, DeviceState::Open);
                        lease.device = Some(Arc::clone(&device));
                        yield DeviceEvent::Open(DeviceHandle { id: id.clone(), device });
                    }
                    PlatformEvent::Disconnected => {
                        warn!(device = %id, "Capture device disconnected");
                        manager.set_device_state(&id, DeviceState::Disconnected);
                        lease.release(DeviceState::Closed);
                        yield DeviceEvent::Disconnected;
                        break;
                    }
                    PlatformEvent::Error(e) => {
                        warn!(device = %id, error = %e, "Capture device error");
                        manager.set_device_state(&id, DeviceState::Error);
                        lease.release(DeviceState::Closed);
                        yield DeviceEvent::Error(e);
                        break;
                    }
                }
            }
        }
    }

    /// Configure a capture session rendering into `outputs`
    ///
    /// A live session on the same device is closed first. Resolves once the
    /// device confirms the configuration.
    pub async fn create_session(
        &self,
        device: &DeviceHandle,
        outputs: Vec<OutputSurface>,
        profile: ColorProfile,
    ) -> BackendResult<CaptureSession> {
        if self.device_state(&device.id) != DeviceState::Open {
            return Err(CameraError::DeviceAccessFailure(format!(
                "{} is not open",
                device.id
            )));
        }

        let superseded = self.lock().sessions.remove(&device.id);
        if let Some(previous) = superseded {
            debug!(device = %device.id, serial = previous.serial, "Superseding capture session");
            previous.close_platform();
        }

        debug!(device = %device.id, outputs = outputs.len(), ?profile, "Configuring capture session");
        let reply = device.device.create_session(outputs, profile);
        let platform = match tokio::time::timeout(SESSION_CONFIGURE_TIMEOUT, reply).await {
            Err(_) => {
                return Err(CameraError::SessionConfigurationFailure(format!(
                    "{} did not confirm the session in time",
                    device.id
                )));
            }
            Ok(Err(_)) => {
                return Err(CameraError::DeviceAccessFailure(format!(
                    "{} dropped the session request",
                    device.id
                )));
            }
            Ok(Ok(result)) => result?,
        };

        let mut state = self.lock();
        state.next_serial += 1;
        let inner = Arc::new(SessionInner {
            serial: state.next_serial,
            device: device.id.clone(),
            platform,
            standing: Mutex::new(None),
            closed: AtomicBool::new(false),
            manager: Arc::clone(&self.state),
        });
        state.sessions.insert(device.id.clone(), Arc::clone(&inner));
        info!(device = %device.id, serial = inner.serial, "Capture session configured");
        Ok(CaptureSession { inner })
    }

    fn set_device_state(&self, id: &DeviceId, device_state: DeviceState) {
        self.lock().devices.insert(id.clone(), device_state);
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<ManagerState>) -> MutexGuard<'_, ManagerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Closes the device when the open stream ends or is dropped
struct DeviceLease {
    manager: CaptureDeviceSessionManager,
    id: DeviceId,
    device: Option<Arc<dyn PlatformDevice>>,
}

impl DeviceLease {
    fn release(&mut self, final_state: DeviceState) {
        let session = self.manager.lock().sessions.remove(&self.id);
        if let Some(session) = session {
            session.close_platform();
        }
        if let Some(device) = self.device.take() {
            debug!(device = %self.id, "Closing capture device");
            self.manager.set_device_state(&self.id, DeviceState::Closing);
            device.close();
        }
        self.manager.set_device_state(&self.id, final_state);
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if self.device.is_some() {
            self.release(DeviceState::Closed);
        } else if self.manager.device_state(&self.id) == DeviceState::Opening {
            self.manager.set_device_state(&self.id, DeviceState::Closed);
        }
    }
}

struct SessionInner {
    serial: u64,
    device: DeviceId,
    platform: Box<dyn PlatformSession>,
    standing: Mutex<Option<CaptureRequest>>,
    closed: AtomicBool,
    manager: Arc<Mutex<ManagerState>>,
}

impl SessionInner {
    fn close_platform(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(device = %self.device, serial = self.serial, "Closing capture session");
            self.platform.close();
        }
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CameraError::DeviceAccessFailure(format!(
                "capture session {} on {} is closed",
                self.serial, self.device
            )))
        } else {
            Ok(())
        }
    }
}

/// A configured session on one device
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<SessionInner>,
}

impl CaptureSession {
    pub fn device_id(&self) -> &DeviceId {
        &self.inner.device
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Install the standing request frames are produced with
    pub fn set_repeating(&self, request: CaptureRequest) -> BackendResult<()> {
        self.inner.ensure_open()?;
        self.inner.platform.set_repeating(&request)?;
        *self
            .inner
            .standing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(request);
        Ok(())
    }

    /// Reissue the standing request with a new zoom ratio
    pub fn update_zoom(&self, zoom_ratio: f32) -> BackendResult<()> {
        let standing = *self
            .inner
            .standing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match standing {
            Some(request) => self.set_repeating(request.with_zoom(zoom_ratio)),
            None => Ok(()),
        }
    }

    /// Issue a one-shot request
    pub fn capture(&self, request: CaptureRequest) -> BackendResult<()> {
        self.inner.ensure_open()?;
        self.inner.platform.capture(&request)
    }

    pub fn close(&self) {
        let mut state = lock_state(&self.inner.manager);
        let is_current = state
            .sessions
            .get(&self.inner.device)
            .is_some_and(|s| Arc::ptr_eq(s, &self.inner));
        if is_current {
            state.sessions.remove(&self.inner.device);
        }
        drop(state);
        self.inner.close_platform();
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("device", &self.inner.device)
            .field("serial", &self.inner.serial)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_camera::{VirtualCamera, VirtualCaptureService};
    use futures::StreamExt;
    use std::time::Duration;

    fn manager_with(camera: VirtualCamera) -> (CaptureDeviceSessionManager, DeviceId) {
        let id = camera.id().clone();
        let service = Arc::new(VirtualCaptureService::new(vec![camera]));
        (CaptureDeviceSessionManager::new(service), id)
    }

    #[tokio::test]
    async fn test_failed_open_ends_closed() {
        let (manager, id) = manager_with(
            VirtualCamera::new("cam", CameraFacing::Front, [0, 0, 0, 255]).failing_open(),
        );
        let events: Vec<DeviceEvent> = manager.open_device(id.clone()).collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            DeviceEvent::Error(CameraError::DeviceOpenFailure(_))
        ));
        assert_eq!(manager.device_state(&id), DeviceState::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_ends_closed_and_drops_session() {
        let (manager, id) = manager_with(
            VirtualCamera::new("cam", CameraFacing::Back, [0, 0, 0, 255])
                .disconnecting_after(Duration::from_millis(50)),
        );
        let mut events = Box::pin(manager.open_device(id.clone()));
        let Some(DeviceEvent::Open(handle)) = events.next().await else {
            panic!("camera did not open");
        };
        assert_eq!(manager.device_state(&id), DeviceState::Open);

        let output: OutputSurface = Arc::new(NoOutput);
        let session = manager
            .create_session(&handle, vec![output], ColorProfile::Standard)
            .await
            .unwrap();
        assert_eq!(manager.live_session_count(), 1);

        assert!(matches!(events.next().await, Some(DeviceEvent::Disconnected)));
        assert!(events.next().await.is_none());
        assert_eq!(manager.device_state(&id), DeviceState::Closed);
        assert_eq!(manager.live_session_count(), 0);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_device() {
        let (manager, id) =
            manager_with(VirtualCamera::new("cam", CameraFacing::Front, [0, 0, 0, 255]));
        let mut events = Box::pin(manager.open_device(id.clone()));
        assert!(matches!(events.next().await, Some(DeviceEvent::Open(_))));

        drop(events);
        assert_eq!(manager.device_state(&id), DeviceState::Closed);
    }

    struct NoOutput;

    impl FrameConsumer for NoOutput {
        fn buffer_size(&self) -> Resolution {
            Resolution::new(8, 4)
        }

        fn queue_frame(&self, _frame: FrameImage) {}

        fn is_released(&self) -> bool {
            false
        }
    }
}
