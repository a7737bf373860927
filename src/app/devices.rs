// SPDX-License-Identifier: GPL-3.0-only

//! Holding the two capture devices open
//!
//! Each device's event stream is owned by a watcher task. The watcher keeps
//! the device open for as long as it runs and reports the first disconnect or
//! error; aborting it drops the stream, which closes the device.

use crate::backends::camera::{
    CameraDescriptor, CameraFacing, CaptureDeviceSessionManager, DeviceEvent, DeviceHandle,
    DeviceId,
};
use crate::constants::timing::DEVICE_OPEN_TIMEOUT;
use crate::errors::CameraError;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type DeviceEvents = Pin<Box<dyn Stream<Item = DeviceEvent> + Send>>;

/// A device failure observed after open
#[derive(Debug, Clone)]
pub struct DeviceLoss {
    pub facing: CameraFacing,
    /// Which [`DevicePair`] the device belonged to
    pub epoch: u64,
    pub error: CameraError,
}

/// One open device and the watcher keeping it open
pub struct OpenDevice {
    pub descriptor: CameraDescriptor,
    pub handle: DeviceHandle,
    watcher: Option<JoinHandle<()>>,
}

impl OpenDevice {
    /// Close the device and wait until its stream has been dropped
    async fn close(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
            let _ = watcher.await;
        }
        debug!(device = %self.descriptor.id, "Capture device released");
    }
}

impl Drop for OpenDevice {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Both cameras, open
pub struct DevicePair {
    pub front: OpenDevice,
    pub back: OpenDevice,
    pub epoch: u64,
}

impl DevicePair {
    pub fn get(&self, facing: CameraFacing) -> &OpenDevice {
        match facing {
            CameraFacing::Front => &self.front,
            CameraFacing::Back => &self.back,
        }
    }

    /// Front then back, the order sessions are created in
    pub fn in_order(&self) -> [(CameraFacing, &OpenDevice); 2] {
        [(CameraFacing::Front, &self.front), (CameraFacing::Back, &self.back)]
    }

    pub async fn close(self) {
        let DevicePair { front, back, epoch } = self;
        futures::future::join(front.close(), back.close()).await;
        info!(epoch, "Capture devices closed");
    }
}

/// Open `front` and `back` concurrently
///
/// Succeeds only if both report `Open` within the open timeout; a device that
/// did open is closed again when the other fails. Losses after open are sent
/// to `losses` tagged with `epoch`.
pub async fn open_pair(
    manager: &CaptureDeviceSessionManager,
    front: CameraDescriptor,
    back: CameraDescriptor,
    epoch: u64,
    losses: mpsc::UnboundedSender<DeviceLoss>,
) -> Result<DevicePair, CameraError> {
    info!(front = %front.id, back = %back.id, epoch, "Opening capture devices");
    let (front, back) = futures::future::join(
        open_one(manager, front, CameraFacing::Front, epoch, losses.clone()),
        open_one(manager, back, CameraFacing::Back, epoch, losses),
    )
    .await;

    match (front, back) {
        (Ok(front), Ok(back)) => Ok(DevicePair { front, back, epoch }),
        (Err(e), other) | (other, Err(e)) => {
            if let Ok(opened) = other {
                opened.close().await;
            }
            Err(e)
        }
    }
}

async fn open_one(
    manager: &CaptureDeviceSessionManager,
    descriptor: CameraDescriptor,
    facing: CameraFacing,
    epoch: u64,
    losses: mpsc::UnboundedSender<DeviceLoss>,
) -> Result<OpenDevice, CameraError> {
    let mut events: DeviceEvents = Box::pin(manager.open_device(descriptor.id.clone()));

    let handle = match tokio::time::timeout(DEVICE_OPEN_TIMEOUT, events.next()).await {
        Ok(Some(DeviceEvent::Open(handle))) => handle,
        Ok(Some(DeviceEvent::Error(e))) => return Err(e),
        Ok(Some(DeviceEvent::Disconnected)) | Ok(None) => {
            return Err(CameraError::DeviceDisconnected);
        }
        Err(_) => {
            return Err(CameraError::DeviceOpenFailure(format!(
                "{} did not open within {:?}",
                descriptor.id, DEVICE_OPEN_TIMEOUT
            )));
        }
    };

    let watcher = tokio::spawn(watch_device(
        descriptor.id.clone(),
        facing,
        epoch,
        events,
        losses,
    ));
    Ok(OpenDevice {
        descriptor,
        handle,
        watcher: Some(watcher),
    })
}

async fn watch_device(
    id: DeviceId,
    facing: CameraFacing,
    epoch: u64,
    mut events: DeviceEvents,
    losses: mpsc::UnboundedSender<DeviceLoss>,
) {
    while let Some(event) = events.next().await {
        let error = match event {
            DeviceEvent::Open(_) => continue,
            DeviceEvent::Disconnected => CameraError::DeviceDisconnected,
            DeviceEvent::Error(e) => e,
        };
        warn!(device = %id, %facing, error = %error, "Open capture device lost");
        let _ = losses.send(DeviceLoss {
            facing,
            epoch,
            error,
        });
        return;
    }
}
