// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use serde::{Deserialize, Serialize};

/// Video encoder bitrate presets
///
/// Used when the camera settings carry no explicit bitrate. The preset is
/// resolved against the recorded output width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Low bitrate - smaller files, reduced quality
    Low,
    /// Medium bitrate - balanced quality and file size (default)
    #[default]
    Medium,
    /// High bitrate - larger files, better quality
    High,
}

impl BitratePreset {
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Get bitrate in kbps for a given output width
    ///
    /// - SD (640x480): Low=1, Medium=2, High=4 Mbps
    /// - HD (1280x720): Low=2.5, Medium=5, High=10 Mbps
    /// - Full HD (1920x1080): Low=4, Medium=8, High=16 Mbps
    /// - 2K (2560x1440): Low=8, Medium=16, High=32 Mbps
    /// - 4K (3840x2160): Low=15, Medium=30, High=50 Mbps
    pub fn bitrate_kbps(&self, width: u32) -> u32 {
        match (get_resolution_tier(width), self) {
            (ResolutionTier::SD, BitratePreset::Low) => 1_000,
            (ResolutionTier::SD, BitratePreset::Medium) => 2_000,
            (ResolutionTier::SD, BitratePreset::High) => 4_000,
            (ResolutionTier::HD, BitratePreset::Low) => 2_500,
            (ResolutionTier::HD, BitratePreset::Medium) => 5_000,
            (ResolutionTier::HD, BitratePreset::High) => 10_000,
            (ResolutionTier::FullHD, BitratePreset::Low) => 4_000,
            (ResolutionTier::FullHD, BitratePreset::Medium) => 8_000,
            (ResolutionTier::FullHD, BitratePreset::High) => 16_000,
            (ResolutionTier::TwoK, BitratePreset::Low) => 8_000,
            (ResolutionTier::TwoK, BitratePreset::Medium) => 16_000,
            (ResolutionTier::TwoK, BitratePreset::High) => 32_000,
            (ResolutionTier::FourK, BitratePreset::Low) => 15_000,
            (ResolutionTier::FourK, BitratePreset::Medium) => 30_000,
            (ResolutionTier::FourK, BitratePreset::High) => 50_000,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// SD: 640x480 and below
    SD,
    /// HD: 1280x720
    HD,
    /// Full HD: 1920x1080
    FullHD,
    /// 2K: 2560x1440
    TwoK,
    /// 4K: 3840x2160 and above
    FourK,
}

/// Get the resolution tier for a given width
pub fn get_resolution_tier(width: u32) -> ResolutionTier {
    match width {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 2560 => ResolutionTier::TwoK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Format bitrate for display (e.g., "8 Mbps" or "2.5 Mbps")
pub fn format_bitrate(bps: u32) -> String {
    let mbps = bps as f64 / 1_000_000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// Timeouts and pacing
pub mod timing {
    use std::time::Duration;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// How long to wait for a device to report Open, Disconnected or Error
    pub const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

    /// How long a device may take to confirm a capture session
    pub const SESSION_CONFIGURE_TIMEOUT: Duration = Duration::from_secs(5);

    /// How long a still capture waits for fresh frames from both cameras
    pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

    /// How long a still capture waits for the rendered image to land
    pub const STILL_READBACK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Encoder drain timeout on stop
    pub const ENCODER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default preview frame rate when the settings carry none
    pub const DEFAULT_FRAME_RATE: u32 = 30;

    /// Frame interval for a frame rate, never zero
    pub fn frame_interval(fps: u32) -> Duration {
        Duration::from_secs(1) / fps.max(1)
    }
}

/// Picture-in-picture overlay placement
///
/// Offsets are in normalized device coordinates of the output, y up.
pub mod pip {
    /// Overlay size relative to the output
    pub const DEFAULT_SCALE: f32 = 0.3;
    pub const MIN_SCALE: f32 = 0.1;
    pub const MAX_SCALE: f32 = 1.0;

    /// Default overlay center: top-right corner region
    pub const DEFAULT_OFFSET: (f32, f32) = (0.6, 0.6);
}

/// Rendering constants
pub mod render {
    /// Row alignment of GPU readback buffers in bytes
    pub const READBACK_ROW_ALIGNMENT: u32 = 256;

    /// Clear color behind the background layer
    pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    /// Buffers an image reader may hold, queued and outstanding together
    pub const MAX_STILL_IMAGES: usize = 2;

    /// Round a row length up to the readback alignment
    pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
        let unpadded = width * bytes_per_pixel;
        unpadded.div_ceil(READBACK_ROW_ALIGNMENT) * READBACK_ROW_ALIGNMENT
    }
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
