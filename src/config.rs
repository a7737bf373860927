// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{CameraBackendType, ColorProfile, Resolution};
use crate::constants::{BitratePreset, pip, timing};
use crate::errors::AppError;
use crate::gpu::RendererKind;
use crate::pipelines::photo::EncodingFormat;
use crate::pipelines::video::VideoCodec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "dual-camera";
const CONFIG_FILE: &str = "config.json";

/// Capture and encoding settings shared by both cameras
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub front_resolution: Resolution,
    pub back_resolution: Resolution,
    pub video_codec: VideoCodec,
    /// Explicit bitrate in bits per second; derived from the preset when unset
    pub bitrate: Option<u32>,
    pub bitrate_preset: BitratePreset,
    pub frame_rate: u32,
    /// Capture and encode with the extended dynamic range profile in video mode
    pub extended_range: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            front_resolution: Resolution::new(1920, 1080),
            back_resolution: Resolution::new(1920, 1080),
            video_codec: VideoCodec::default(),
            bitrate: None,
            bitrate_preset: BitratePreset::default(),
            frame_rate: timing::DEFAULT_FRAME_RATE,
            extended_range: false,
        }
    }
}

impl CameraSettings {
    /// Composite output size: the larger configured resolution, landscape
    pub fn output_resolution(&self) -> Resolution {
        let front = self.front_resolution.to_landscape();
        let back = self.back_resolution.to_landscape();
        if front.pixels() >= back.pixels() {
            front
        } else {
            back
        }
    }

    /// Video bitrate in bits per second
    pub fn bitrate_bps(&self) -> u32 {
        self.bitrate.unwrap_or_else(|| {
            self.bitrate_preset
                .bitrate_kbps(self.output_resolution().width)
                .saturating_mul(1000)
        })
    }

    /// Frame rate, substituting the default for zero
    pub fn effective_frame_rate(&self) -> u32 {
        if self.frame_rate == 0 {
            timing::DEFAULT_FRAME_RATE
        } else {
            self.frame_rate
        }
    }

    /// Color profile sessions use in video mode
    pub fn video_profile(&self) -> ColorProfile {
        if self.extended_range {
            ColorProfile::ExtendedRange
        } else {
            ColorProfile::Standard
        }
    }
}

/// Persisted application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use
    pub backend: CameraBackendType,
    /// Front camera device id (V4L2 node path); first front-facing device when unset
    pub front_device: Option<String>,
    /// Back camera device id; first back-facing device when unset
    pub back_device: Option<String>,
    pub camera_settings: CameraSettings,
    pub photo_format: EncodingFormat,
    pub jpeg_quality: u8,
    pub renderer: RendererKind,
    /// Record microphone audio alongside video
    pub record_audio: bool,
    /// Front camera as background at startup
    pub flip: bool,
    pub overlay_scale: f32,
    pub overlay_offset: (f32, f32),
    /// Override for the photos directory
    pub photos_dir: Option<PathBuf>,
    /// Override for the videos directory
    pub videos_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CameraBackendType::default(),
            front_device: None,
            back_device: None,
            camera_settings: CameraSettings::default(),
            photo_format: EncodingFormat::default(),
            jpeg_quality: 92,
            renderer: RendererKind::default(),
            record_audio: true,
            flip: false,
            overlay_scale: pip::DEFAULT_SCALE,
            overlay_offset: pip::DEFAULT_OFFSET,
            photos_dir: None,
            videos_dir: None,
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/dual-camera/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, falling back to defaults if missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt config, using defaults");
                Self::default()
            }
        }
    }

    /// Load from the default location
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No config directory, using defaults");
                Self::default()
            }
        }
    }

    /// Write to `path` atomically (temp file + rename)
    pub fn save_to(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;

        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, path)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    pub fn save(&self) -> Result<(), AppError> {
        let path = Self::default_path()
            .ok_or_else(|| AppError::Config("No config directory".into()))?;
        self.save_to(&path)
    }

    /// Photos directory, the override or the default
    pub fn photos_dir(&self) -> PathBuf {
        self.photos_dir
            .clone()
            .unwrap_or_else(crate::storage::default_photos_dir)
    }

    /// Videos directory, the override or the default
    pub fn videos_dir(&self) -> PathBuf {
        self.videos_dir
            .clone()
            .unwrap_or_else(crate::storage::default_videos_dir)
    }
}
