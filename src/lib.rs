// SPDX-License-Identifier: GPL-3.0-only

//! Dual Camera - picture-in-picture capture from two cameras at once
//!
//! Frames from the front and back cameras are composited into one image on a
//! single rendering context per output, then shown as a preview, saved as a
//! still photo or encoded into a video.
//!
//! # Architecture
//!
//! - [`app`]: the orchestrator state machine and the pieces it drives
//! - [`backends`]: camera devices and sessions (V4L2 and virtual)
//! - [`gpu`]: single-threaded rendering contexts (wgpu or CPU)
//! - [`pipelines`]: still photo and video sinks
//! - [`config`]: user configuration handling
//! - [`storage`]: where captured media is written
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(options, settings, collaborators);
//! orchestrator.set_permission(true).await?;
//! let photo = orchestrator.take_picture().await?;
//! ```

pub mod app;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod pipelines;
pub mod shaders;
pub mod storage;

// Re-export commonly used types
pub use app::{CaptureMode, Collaborators, Orchestrator, OrchestratorOptions, State};
pub use config::{CameraSettings, Config};
pub use constants::BitratePreset;
pub use errors::{AppError, AppResult, ErrorEvent};
