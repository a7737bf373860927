// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera capture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                  App Layer                  │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                  │
//! │  ┌─────────────┐    ┌──────────────────┐    │
//! │  │   Camera    │    │  Virtual Camera  │    │
//! │  │   (V4L2)    │    │   (synthetic)    │    │
//! │  └─────────────┘    └──────────────────┘    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! - [`camera`]: device/session management and the V4L2 service
//! - [`virtual_camera`]: scripted cameras for running without hardware

pub mod camera;
pub mod virtual_camera;
