// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 zoom control
//!
//! Optical or digital zoom is exposed by UVC drivers as the absolute zoom
//! control of the camera class. Ratios are mapped linearly onto its integer
//! range, with the control minimum standing for 1x.

use crate::backends::camera::ZoomRange;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

/// Absolute zoom position
pub const V4L2_CID_ZOOM_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 13;

const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;

// (dir << 30) | (size << 16) | ('V' << 8) | nr
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// Integer range of a V4L2 control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
}

/// Query a control's range; `None` when the device lacks it or has it disabled
pub fn query_control(device_path: &str, control_id: u32) -> Option<ControlRange> {
    let file = File::open(device_path).ok()?;
    let fd = file.as_raw_fd();

    let mut qctrl = V4l2Queryctrl {
        id: control_id,
        ctrl_type: 0,
        name: [0; 32],
        minimum: 0,
        maximum: 0,
        step: 0,
        default_value: 0,
        flags: 0,
        reserved: [0; 2],
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCTRL, &mut qctrl as *mut V4l2Queryctrl) };
    if result < 0 || qctrl.flags & V4L2_CTRL_FLAG_DISABLED != 0 {
        return None;
    }

    Some(ControlRange {
        minimum: qctrl.minimum,
        maximum: qctrl.maximum,
        step: qctrl.step.max(1),
    })
}

pub fn set_control(device_path: &str, control_id: u32, value: i32) -> Result<(), String> {
    let file = File::open(device_path).map_err(|e| format!("Failed to open device: {}", e))?;
    let fd = file.as_raw_fd();

    let mut ctrl = V4l2Control {
        id: control_id,
        value,
    };

    let result = unsafe { libc::ioctl(fd, VIDIOC_S_CTRL, &mut ctrl as *mut V4l2Control) };
    if result < 0 {
        let errno = std::io::Error::last_os_error();
        warn!(device_path, control_id, value, ?errno, "Failed to set V4L2 control");
        return Err(format!("Failed to set control: {}", errno));
    }

    if ctrl.value != value {
        debug!(
            device_path,
            control_id,
            requested = value,
            actual = ctrl.value,
            "V4L2 control value was clamped"
        );
    }
    Ok(())
}

/// Mapping between zoom ratios and a device's zoom control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomMapping {
    control: Option<ControlRange>,
}

impl ZoomMapping {
    pub fn probe(device_path: &str) -> Self {
        Self::from_range(query_control(device_path, V4L2_CID_ZOOM_ABSOLUTE))
    }

    pub fn from_range(control: Option<ControlRange>) -> Self {
        let control = control.filter(|c| c.maximum > c.minimum);
        Self { control }
    }

    /// Ratios the control can express; 1x only when there is no control
    pub fn zoom_range(&self) -> ZoomRange {
        match self.control {
            Some(c) => {
                let base = c.minimum.max(1) as f32;
                ZoomRange::new(1.0, c.maximum as f32 / base)
            }
            None => ZoomRange::default(),
        }
    }

    /// Control value for a ratio, snapped to the control step
    pub fn control_value(&self, ratio: f32) -> Option<i32> {
        let c = self.control?;
        let ratio = self.zoom_range().clamp(ratio);
        let base = c.minimum.max(1) as f32;
        let raw = (base * ratio).round() as i32;
        let steps = (raw - c.minimum) / c.step;
        Some((c.minimum + steps * c.step).clamp(c.minimum, c.maximum))
    }

    pub fn apply(&self, device_path: &str, ratio: f32) -> Result<(), String> {
        match self.control_value(ratio) {
            Some(value) => set_control(device_path, V4L2_CID_ZOOM_ABSOLUTE, value),
            None => Ok(()),
        }
    }
}
