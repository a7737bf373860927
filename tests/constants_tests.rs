// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use dual_camera::constants::{BitratePreset, format_bitrate, pip, timing};
use std::time::Duration;

#[test]
fn test_bitrate_preset_values() {
    // Test that all presets exist (Low, Medium, High)
    assert_eq!(BitratePreset::ALL.len(), 3);
}

#[test]
fn test_bitrate_preset_ordering() {
    // Presets are ordered from lowest to highest quality
    let mut prev_bitrate = 0u32;
    for preset in BitratePreset::ALL {
        let bitrate = preset.bitrate_kbps(1920);
        assert!(
            bitrate >= prev_bitrate,
            "Presets should be ordered from lowest to highest"
        );
        prev_bitrate = bitrate;
    }
}

#[test]
fn test_bitrate_scales_with_resolution() {
    let hd_bitrate = BitratePreset::Medium.bitrate_kbps(1280);
    let fhd_bitrate = BitratePreset::Medium.bitrate_kbps(1920);
    let uhd_bitrate = BitratePreset::Medium.bitrate_kbps(3840);

    assert!(hd_bitrate < fhd_bitrate);
    assert!(fhd_bitrate < uhd_bitrate);
}

#[test]
fn test_bitrate_preset_display_names() {
    for preset in BitratePreset::ALL {
        let name = preset.display_name();
        assert!(!name.is_empty(), "Preset {:?} has empty display name", preset);
    }
}

#[test]
fn test_format_bitrate() {
    assert_eq!(format_bitrate(8_000_000), "8 Mbps");
    assert_eq!(format_bitrate(2_500_000), "2.5 Mbps");
}

#[test]
fn test_frame_interval_never_zero() {
    assert_eq!(timing::frame_interval(0), Duration::from_secs(1));
    assert_eq!(timing::frame_interval(50), Duration::from_millis(20));
}

#[test]
fn test_default_overlay_fits_output() {
    assert!(pip::MIN_SCALE <= pip::DEFAULT_SCALE && pip::DEFAULT_SCALE <= pip::MAX_SCALE);
    let (dx, dy) = pip::DEFAULT_OFFSET;
    assert!(dx.abs() + pip::DEFAULT_SCALE <= 1.0);
    assert!(dy.abs() + pip::DEFAULT_SCALE <= 1.0);
}
