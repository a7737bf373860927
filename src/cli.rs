// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! Each command drives the orchestrator through its public commands, exactly
//! as a UI would, on a runtime of its own.

use dual_camera::app::{CaptureMode, Collaborators, Orchestrator, OrchestratorOptions};
use dual_camera::backends::camera::v4l2::V4l2CaptureService;
use dual_camera::backends::camera::{CameraBackendType, CaptureService, Resolution};
use dual_camera::backends::virtual_camera::VirtualCaptureService;
use dual_camera::config::Config;
use dual_camera::constants::{BitratePreset, format_bitrate};
use dual_camera::errors::RenderError;
use dual_camera::gpu::{FrameSink, OutputTarget, RenderedFrame};
use dual_camera::pipelines::video::VideoCodec;
use dual_camera::pipelines::video::encoder_selection::available_encoders;
use dual_camera::pipelines::video::GstEncoderFactory;
use dual_camera::storage::FileMediaStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Preview size used when no window exists
const CLI_PREVIEW_SIZE: Resolution = Resolution::new(1280, 720);

fn capture_service(config: &Config, use_virtual: bool) -> Arc<dyn CaptureService> {
    if use_virtual || config.backend == CameraBackendType::Virtual {
        Arc::new(VirtualCaptureService::default_pair())
    } else {
        Arc::new(V4l2CaptureService::new(
            config.front_device.clone(),
            config.back_device.clone(),
        ))
    }
}

fn orchestrator(
    config: &Config,
    use_virtual: bool,
    photos_dir: Option<PathBuf>,
    videos_dir: Option<PathBuf>,
) -> Orchestrator {
    let store = FileMediaStore::new(
        photos_dir.unwrap_or_else(|| config.photos_dir()),
        videos_dir.unwrap_or_else(|| config.videos_dir()),
    );
    Orchestrator::new(
        OrchestratorOptions::from(config),
        config.camera_settings,
        Collaborators {
            capture: capture_service(config, use_virtual),
            store: Arc::new(store),
            encoders: Arc::new(GstEncoderFactory),
        },
    )
}

/// List cameras with facing and zoom range, then the usable encoders
pub fn list_cameras(use_virtual: bool) -> CliResult {
    let config = Config::load();
    let service = capture_service(&config, use_virtual);
    let cameras = service.enumerate_devices()?;

    if cameras.is_empty() {
        println!("No cameras found.");
    } else {
        println!("Available cameras:");
        println!();
        for camera in &cameras {
            println!("  {} ({})", camera.name, camera.id);
            println!("      Facing: {}", camera.facing);
            println!(
                "      Zoom: {:.1}x - {:.1}x",
                camera.zoom_range.min, camera.zoom_range.max
            );
            let sizes: Vec<String> = camera
                .resolutions
                .iter()
                .take(3)
                .map(|r| r.to_string())
                .collect();
            if !sizes.is_empty() {
                println!("      Sizes: {}", sizes.join(", "));
            }
            println!();
        }
    }

    for codec in [VideoCodec::Avc, VideoCodec::Hevc] {
        let encoders: Vec<String> = available_encoders(codec)
            .iter()
            .map(|e| {
                if e.is_hardware {
                    format!("{} (hw)", e.element_name)
                } else {
                    e.element_name.to_string()
                }
            })
            .collect();
        if encoders.is_empty() {
            println!("{} encoders: none", codec);
        } else {
            println!("{} encoders: {}", codec, encoders.join(", "));
        }
    }

    let output = config.camera_settings.output_resolution();
    let presets: Vec<String> = BitratePreset::ALL
        .iter()
        .map(|preset| {
            let marker = if *preset == config.camera_settings.bitrate_preset {
                " *"
            } else {
                ""
            };
            format!(
                "{} {}{}",
                preset.display_name(),
                format_bitrate(preset.bitrate_kbps(output.width) * 1000),
                marker
            )
        })
        .collect();
    println!("Bitrate presets at {}: {}", output, presets.join(", "));
    Ok(())
}

/// Show the config file, or write the defaults over it with `reset`
pub fn show_config(reset: bool) -> CliResult {
    let Some(path) = Config::default_path() else {
        return Err("no config directory".into());
    };

    let config = if reset {
        let config = Config::default();
        config.save()?;
        println!("Defaults written to {}", path.display());
        config
    } else {
        println!("Config file: {}", path.display());
        Config::load()
    };

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Take one composited photo
pub fn take_photo(flip: bool, output: Option<PathBuf>, use_virtual: bool) -> CliResult {
    let config = Config::load();
    if let Some(dir) = &output {
        std::fs::create_dir_all(dir)?;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let orchestrator = orchestrator(&config, use_virtual, output, None);
        orchestrator.set_flip(flip || config.flip);
        orchestrator.set_permission(true).await?;
        orchestrator.switch_mode(CaptureMode::Picture).await?;

        println!("Capturing...");
        let result = orchestrator.take_picture().await;
        orchestrator.destroy().await;

        let path = result?;
        println!("Photo saved: {}", path.display());
        Ok(())
    })
}

/// Record for `duration` seconds, or until Ctrl+C
pub fn record_video(
    duration: u64,
    flip: bool,
    output: Option<PathBuf>,
    use_virtual: bool,
    record_audio: bool,
) -> CliResult {
    let mut config = Config::load();
    config.record_audio = record_audio && config.record_audio;
    if let Some(dir) = &output {
        std::fs::create_dir_all(dir)?;
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let orchestrator = orchestrator(&config, use_virtual, None, output);
        orchestrator.set_flip(flip || config.flip);
        orchestrator.set_permission(true).await?;
        orchestrator.switch_mode(CaptureMode::Video).await?;

        let settings = config.camera_settings;
        println!(
            "Recording {} {} at {} fps, {}{}",
            settings.output_resolution(),
            settings.video_codec,
            settings.effective_frame_rate(),
            format_bitrate(settings.bitrate_bps()),
            if config.record_audio { " with audio" } else { "" }
        );
        if let Err(e) = orchestrator.start_recording().await {
            orchestrator.destroy().await;
            return Err(e.into());
        }
        println!("Recording... (press Ctrl+C to stop early)");

        let start = Instant::now();
        let target_duration = Duration::from_secs(duration);
        while start.elapsed() < target_duration {
            if stop_flag.load(Ordering::SeqCst) {
                println!();
                println!("Stopping early...");
                break;
            }
            let elapsed = start.elapsed().as_secs();
            print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
            std::io::Write::flush(&mut std::io::stdout())?;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        println!();

        let result = orchestrator.stop_recording().await;
        orchestrator.destroy().await;

        let video = result?;
        println!(
            "Video saved: {} ({} frames, tracks: {:?})",
            video.path.display(),
            video.summary.frames,
            video.summary.tracks
        );
        Ok(())
    })
}

#[derive(Default)]
struct FrameCounter {
    frames: AtomicU64,
}

impl FrameSink for FrameCounter {
    fn present(&self, _frame: RenderedFrame) -> Result<(), RenderError> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Preview into a counting sink and report frames per second
pub fn run_preview(duration: u64, use_virtual: bool) -> CliResult {
    let config = Config::load();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let orchestrator = orchestrator(&config, use_virtual, None, None);
        let counter = Arc::new(FrameCounter::default());
        orchestrator.set_permission(true).await?;
        orchestrator
            .set_output_target(Some(OutputTarget::new(
                "cli-preview",
                CLI_PREVIEW_SIZE,
                counter.clone(),
            )))
            .await?;

        let start = Instant::now();
        tokio::time::sleep(Duration::from_secs(duration)).await;
        let elapsed = start.elapsed().as_secs_f64();
        let state = orchestrator.current_state();
        orchestrator.destroy().await;

        let frames = counter.frames.load(Ordering::Relaxed);
        println!("State: {:?}", state);
        println!(
            "Presented {} frames in {:.1}s ({:.1} fps)",
            frames,
            elapsed,
            frames as f64 / elapsed.max(f64::EPSILON)
        );
        if let Some(error) = orchestrator.current_error() {
            return Err(format!("preview failed: {:?}", error).into());
        }
        Ok(())
    })
}
