// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera backends

use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, CameraError>;

/// Platform identity of a capture device (a V4L2 node path, a virtual camera name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the device a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraFacing {
    Front,
    Back,
}

impl CameraFacing {
    /// Session creation order
    pub const ALL: [CameraFacing; 2] = [CameraFacing::Front, CameraFacing::Back];

    pub fn opposite(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }
}

impl std::fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraFacing::Front => write!(f, "front"),
            CameraFacing::Back => write!(f, "back"),
        }
    }
}

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CameraBackendType {
    /// Video4Linux2 capture nodes
    #[default]
    V4l2,
    /// Synthetic cameras producing solid-color frames
    Virtual,
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::V4l2 => write!(f, "V4L2"),
            CameraBackendType::Virtual => write!(f, "virtual"),
        }
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_landscape(&self) -> bool {
        self.width >= self.height
    }

    /// Same resolution with width and height exchanged
    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Same resolution with the long edge horizontal
    pub fn to_landscape(&self) -> Self {
        if self.is_landscape() {
            *self
        } else {
            self.transposed()
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Supported zoom ratios of a device, `min <= max`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomRange {
    pub min: f32,
    pub max: f32,
}

impl ZoomRange {
    pub fn new(min: f32, max: f32) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Clamp a requested ratio into the range; NaN maps to the minimum
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self { min: 1.0, max: 1.0 }
    }
}

/// Lifecycle of a capture device as seen by the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    Opening,
    Open,
    Closing,
    Disconnected,
    Error,
}

/// Color range a capture session and its outputs run in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorProfile {
    /// 8-bit SDR
    #[default]
    Standard,
    /// 10-bit HLG
    ExtendedRange,
}

/// Kind of request a session repeats or issues once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    Record,
    Still,
}

/// Capture request parameters applied by a device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub zoom_ratio: f32,
    pub target_fps: Option<u32>,
}

impl CaptureRequest {
    pub fn repeating(template: RequestTemplate, zoom_ratio: f32, target_fps: u32) -> Self {
        Self {
            template,
            zoom_ratio,
            target_fps: Some(target_fps),
        }
    }

    pub fn still(zoom_ratio: f32) -> Self {
        Self {
            template: RequestTemplate::Still,
            zoom_ratio,
            target_fps: None,
        }
    }

    pub fn with_zoom(mut self, zoom_ratio: f32) -> Self {
        self.zoom_ratio = zoom_ratio;
        self
    }
}

/// Enumerated capture device
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDescriptor {
    pub id: DeviceId,
    pub name: String,
    pub facing: CameraFacing,
    pub zoom_range: ZoomRange,
    /// Supported frame sizes, largest first
    pub resolutions: Vec<Resolution>,
}

/// One RGBA8 frame produced by a device
#[derive(Clone)]
pub struct FrameImage {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA rows
    pub data: Arc<[u8]>,
    pub captured_at: Instant,
    pub sequence: u64,
}

impl FrameImage {
    pub fn new(width: u32, height: u32, data: Arc<[u8]>, sequence: u64) -> Self {
        Self {
            width,
            height,
            data,
            captured_at: Instant::now(),
            sequence,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// A single-color frame
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(width, height, Arc::from(data), 0)
    }
}

impl std::fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Receiving end of a capture session output
///
/// Devices deliver frames here; the consumer decides when they reach a texture.
pub trait FrameConsumer: Send + Sync {
    /// Size the producer should render into
    fn buffer_size(&self) -> Resolution;

    /// Hand over the newest frame
    fn queue_frame(&self, frame: FrameImage);

    /// Whether the consumer has been released and frames should stop
    fn is_released(&self) -> bool;
}

/// A surface a capture session renders into
pub type OutputSurface = Arc<dyn FrameConsumer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_range_orders_bounds() {
        let range = ZoomRange::new(4.0, 1.0);
        assert_eq!(range.min, 1.0);
        assert_eq!(range.max, 4.0);
    }

    #[test]
    fn test_zoom_clamp() {
        let range = ZoomRange::new(1.0, 4.0);
        assert_eq!(range.clamp(0.5), 1.0);
        assert_eq!(range.clamp(2.5), 2.5);
        assert_eq!(range.clamp(10.0), 4.0);
        assert_eq!(range.clamp(f32::NAN), 1.0);
    }

    #[test]
    fn test_resolution_orientation() {
        let portrait = Resolution::new(1080, 1920);
        assert!(!portrait.is_landscape());
        assert_eq!(portrait.to_landscape(), Resolution::new(1920, 1080));
        assert_eq!(Resolution::new(640, 480).to_landscape(), Resolution::new(640, 480));
    }

    #[test]
    fn test_solid_frame_size() {
        let frame = FrameImage::solid(4, 2, [1, 2, 3, 4]);
        assert_eq!(frame.data.len(), 32);
        assert_eq!(&frame.data[4..8], &[1, 2, 3, 4]);
    }
}
