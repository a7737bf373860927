// SPDX-License-Identifier: GPL-3.0-only

//! Still capture pipeline
//!
//! ```text
//! render once → ImageReader → CapturedBuffer → unpad → encode → MediaStore
//! ```
//!
//! The captured buffer is closed as soon as its pixels are copied out, so the
//! reader slot is free again before encoding starts.

pub mod encoding;
pub mod reader;
pub mod sink;

pub use encoding::{EncodedImage, EncodingFormat, PhotoEncoder};
pub use reader::{CapturedBuffer, ImageReader};
pub use sink::ImageSink;
