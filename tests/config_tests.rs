// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use dual_camera::backends::camera::{CameraBackendType, ColorProfile, Resolution};
use dual_camera::config::{CameraSettings, Config};
use dual_camera::{CaptureMode, OrchestratorOptions};

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.backend, CameraBackendType::V4l2);
    assert!(config.record_audio, "Audio should be recorded by default");
    assert!(!config.flip, "Back camera should be the background by default");
}

#[test]
fn test_config_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let mut config = Config::default();
    config.backend = CameraBackendType::Virtual;
    config.front_device = Some("/dev/video2".into());
    config.camera_settings.frame_rate = 24;
    config.save_to(&path).unwrap();

    assert_eq!(Config::load_from(&path), config);
}

#[test]
fn test_corrupt_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert_eq!(Config::load_from(&path), Config::default());
}

#[test]
fn test_missing_fields_take_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "flip": true }"#).unwrap();

    let config = Config::load_from(&path);
    assert!(config.flip);
    assert_eq!(config.camera_settings, CameraSettings::default());
}

#[test]
fn test_output_resolution_is_largest_landscape() {
    let settings = CameraSettings {
        front_resolution: Resolution::new(720, 1280),
        back_resolution: Resolution::new(640, 480),
        ..CameraSettings::default()
    };
    assert_eq!(settings.output_resolution(), Resolution::new(1280, 720));
}

#[test]
fn test_zero_frame_rate_uses_default() {
    let settings = CameraSettings {
        frame_rate: 0,
        ..CameraSettings::default()
    };
    assert_eq!(settings.effective_frame_rate(), 30);
}

#[test]
fn test_extended_range_selects_video_profile() {
    let settings = CameraSettings {
        extended_range: true,
        ..CameraSettings::default()
    };
    assert_eq!(settings.video_profile(), ColorProfile::ExtendedRange);
    assert_eq!(CameraSettings::default().video_profile(), ColorProfile::Standard);
}

#[test]
fn test_options_follow_config() {
    let config = Config {
        flip: true,
        front_device: Some("front0".into()),
        ..Config::default()
    };
    let options = OrchestratorOptions::from(&config);
    assert!(options.layout.flip);
    assert_eq!(options.front_device.map(|id| id.to_string()), Some("front0".to_string()));
    assert_eq!(options.mode, CaptureMode::Picture);
}
