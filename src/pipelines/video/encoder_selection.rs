// SPDX-License-Identifier: GPL-3.0-only

//! Encoder element selection for the recording pipeline
//!
//! Hardware encoders are tried before software ones. Each element gets its
//! bitrate property set in the unit that element expects.

use super::VideoCodec;
use crate::errors::RecordingError;
use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info};

/// A video encoder candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderInfo {
    pub element_name: &'static str,
    pub is_hardware: bool,
}

const AVC_ENCODERS: &[EncoderInfo] = &[
    EncoderInfo { element_name: "vah264enc", is_hardware: true },
    EncoderInfo { element_name: "vaapih264enc", is_hardware: true },
    EncoderInfo { element_name: "nvh264enc", is_hardware: true },
    EncoderInfo { element_name: "v4l2h264enc", is_hardware: true },
    EncoderInfo { element_name: "x264enc", is_hardware: false },
    EncoderInfo { element_name: "openh264enc", is_hardware: false },
];

const HEVC_ENCODERS: &[EncoderInfo] = &[
    EncoderInfo { element_name: "vah265enc", is_hardware: true },
    EncoderInfo { element_name: "vaapih265enc", is_hardware: true },
    EncoderInfo { element_name: "nvh265enc", is_hardware: true },
    EncoderInfo { element_name: "v4l2h265enc", is_hardware: true },
    EncoderInfo { element_name: "x265enc", is_hardware: false },
];

const AAC_ENCODERS: &[&str] = &["avenc_aac", "fdkaacenc", "faac", "voaacenc"];

/// Audio bitrate for AAC in bits per second
pub const AUDIO_BITRATE_BPS: i32 = 128_000;

/// Encoder candidates for `codec`, highest priority first
pub fn candidates(codec: VideoCodec) -> &'static [EncoderInfo] {
    match codec {
        VideoCodec::Avc => AVC_ENCODERS,
        VideoCodec::Hevc => HEVC_ENCODERS,
    }
}

/// Candidates whose element factories are installed
pub fn available_encoders(codec: VideoCodec) -> Vec<EncoderInfo> {
    if gst::init().is_err() {
        return Vec::new();
    }
    candidates(codec)
        .iter()
        .copied()
        .filter(|info| gst::ElementFactory::find(info.element_name).is_some())
        .collect()
}

/// Selected video encoder with its parser
pub struct SelectedVideoEncoder {
    pub encoder: gst::Element,
    pub parser: gst::Element,
    pub info: EncoderInfo,
}

/// Build the best available encoder for `codec`
pub fn select_video_encoder(
    codec: VideoCodec,
    bitrate_bps: u32,
) -> Result<SelectedVideoEncoder, RecordingError> {
    gst::init().map_err(|e| {
        RecordingError::EncoderNotAvailable(format!("Failed to initialize GStreamer: {}", e))
    })?;

    for info in candidates(codec) {
        let Ok(encoder) = gst::ElementFactory::make(info.element_name).build() else {
            continue;
        };
        info!(
            encoder = info.element_name,
            %codec,
            hardware = info.is_hardware,
            "Selected video encoder"
        );
        configure_video_encoder(&encoder, info.element_name, bitrate_bps);

        let parser = gst::ElementFactory::make(codec.parser_name())
            .build()
            .map_err(|e| {
                RecordingError::EncoderNotAvailable(format!(
                    "Failed to create parser {}: {}",
                    codec.parser_name(),
                    e
                ))
            })?;

        return Ok(SelectedVideoEncoder {
            encoder,
            parser,
            info: *info,
        });
    }

    Err(RecordingError::EncoderNotAvailable(format!(
        "No {} encoder available",
        codec
    )))
}

/// Build the first available AAC encoder
pub fn select_audio_encoder() -> Result<gst::Element, RecordingError> {
    for name in AAC_ENCODERS {
        if let Ok(encoder) = gst::ElementFactory::make(name).build() {
            if encoder.has_property("bitrate") {
                encoder.set_property_from_str("bitrate", &AUDIO_BITRATE_BPS.to_string());
            }
            info!(encoder = %name, "Selected audio encoder");
            return Ok(encoder);
        }
    }
    Err(RecordingError::EncoderNotAvailable(
        "No AAC encoder available".into(),
    ))
}

/// Set rate control and bitrate on a known encoder element
pub fn configure_video_encoder(encoder: &gst::Element, encoder_name: &str, bitrate_bps: u32) {
    let kbps = bitrate_kbps(bitrate_bps);

    match encoder_name {
        "x264enc" => {
            encoder.set_property_from_str("speed-preset", "veryfast");
            encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property("bitrate", kbps);
        }
        "x265enc" => {
            encoder.set_property_from_str("speed-preset", "veryfast");
            encoder.set_property("bitrate", kbps);
        }
        "vaapih264enc" | "vaapih265enc" | "vah264enc" | "vah265enc" => {
            encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", kbps);
        }
        "nvh264enc" | "nvh265enc" => {
            encoder.set_property("bitrate", kbps);
            encoder.set_property_from_str("rc-mode", "cbr");
        }
        "openh264enc" => {
            encoder.set_property_from_str("rate-control", "bitrate");
            encoder.set_property("bitrate", bitrate_bps);
            encoder.set_property_from_str("usage-type", "camera");
        }
        "v4l2h264enc" | "v4l2h265enc" => {}
        _ => {
            debug!(encoder = encoder_name, "Unknown encoder, using defaults");
            return;
        }
    }
    debug!(encoder = encoder_name, bitrate_kbps = kbps, "Configured video encoder");
}

/// Bits per second to whole kilobits, at least 1
pub fn bitrate_kbps(bitrate_bps: u32) -> u32 {
    (bitrate_bps / 1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_encoders_come_first() {
        for codec in [VideoCodec::Avc, VideoCodec::Hevc] {
            let list = candidates(codec);
            let first_software = list.iter().position(|e| !e.is_hardware).unwrap();
            assert!(list[first_software..].iter().all(|e| !e.is_hardware));
        }
    }

    #[test]
    fn test_bitrate_kbps() {
        assert_eq!(bitrate_kbps(6_000_000), 6_000);
        assert_eq!(bitrate_kbps(10), 1);
    }
}
