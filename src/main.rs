//! niwrapper frame grab tool

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tracing::{error, info, warn};

use niwrapper::{Config, SyntheticSensor};

#[derive(Parser, Debug)]
#[command(name = "niwrapper")]
#[command(about = "Grab frames through the NiWrapper frame path")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to grab (overrides the configuration)
    #[arg(short, long)]
    frames: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("niwrapper=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("niwrapper grab starting...");

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(frames) = args.frames {
        config.grab.frames = frames;
    }
    niwrapper::CONFIG.store(Arc::new(config.clone()));

    let mode = config.synthetic.video_mode();
    info!(
        format = %mode.pixel_format,
        width = mode.resolution_x,
        height = mode.resolution_y,
        fps = mode.fps,
        "Using synthetic sensor"
    );
    let sensor = Arc::new(SyntheticSensor::new(mode));
    let mut grabber = sensor.grabber(config.grab.options);

    let mut failures = 0u32;
    for _ in 0..config.grab.frames {
        match grabber.grab() {
            Ok(frame) => {
                info!(
                    sequence = frame.meta.sequence,
                    index = frame.meta.frame_index,
                    width = frame.meta.width,
                    height = frame.meta.height,
                    format = ?frame.meta.format,
                    bytes = frame.data.len(),
                    latency_us = frame.timestamp.elapsed().as_micros() as u64,
                    "Frame grabbed"
                );
            }
            Err(e) => {
                failures += 1;
                error!("Grab error: {}", e);
            }
        }
    }

    if failures > 0 {
        warn!(failures, "Some grabs failed");
    }
    info!(
        grabbed = grabber.sequence(),
        allocations = grabber.buffer().allocations(),
        "niwrapper shutting down"
    );
    Ok(())
}
