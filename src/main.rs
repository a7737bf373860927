// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "dual-camera")]
#[command(about = "Picture-in-picture capture from the front and back cameras")]
#[command(version = dual_camera::constants::app_info::version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras and video encoders
    List {
        /// Use the synthetic camera pair instead of real devices
        #[arg(long = "virtual")]
        use_virtual: bool,
    },

    /// Take a composited photo
    Photo {
        /// Front camera as background
        #[arg(long)]
        flip: bool,

        /// Output directory (default: ~/Pictures/dual-camera)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long = "virtual")]
        use_virtual: bool,
    },

    /// Record a composited video
    Video {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        #[arg(long)]
        flip: bool,

        /// Output directory (default: ~/Videos/dual-camera)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long = "virtual")]
        use_virtual: bool,

        /// Record without microphone audio
        #[arg(long)]
        no_audio: bool,
    },

    /// Show the configuration file
    Config {
        /// Overwrite it with the defaults
        #[arg(long)]
        reset: bool,
    },

    /// Run the preview loop and report the achieved frame rate
    Preview {
        #[arg(short, long, default_value = "5")]
        duration: u64,

        #[arg(long = "virtual")]
        use_virtual: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=dual_camera=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { use_virtual } => cli::list_cameras(use_virtual),
        Commands::Photo {
            flip,
            output,
            use_virtual,
        } => cli::take_photo(flip, output, use_virtual),
        Commands::Video {
            duration,
            flip,
            output,
            use_virtual,
            no_audio,
        } => cli::record_video(duration, flip, output, use_virtual, !no_audio),
        Commands::Config { reset } => cli::show_config(reset),
        Commands::Preview {
            duration,
            use_virtual,
        } => cli::run_preview(duration, use_virtual),
    }
}
