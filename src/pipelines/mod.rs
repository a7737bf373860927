// SPDX-License-Identifier: GPL-3.0-only

//! Output sinks for composited frames
//!
//! ```text
//! ┌─────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ render once │ ──▶ │  Photo Pipeline   │ ──▶ │  JPEG / PNG  │
//! │             │     │  - ImageReader    │     │              │
//! │             │     │  - Unpad + encode │     │              │
//! └─────────────┘     └───────────────────┘     └──────────────┘
//!
//! ┌─────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ render loop │ ──▶ │  Video Pipeline   │ ──▶ │   MP4 File   │
//! │             │     │  - GStreamer      │     │              │
//! │             │     │  - HW Encoding    │     │              │
//! │             │     │  - Audio Muxing   │     │              │
//! └─────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! - [`photo`]: still image reader pool, JPEG/PNG encoding, persistence
//! - [`video`]: encoder + muxer behind a trait, with a GStreamer implementation

pub mod photo;
pub mod video;
