//! Sound Recorder - a terminal voice recorder for Linux
//!
//! Records from the default PipeWire input, cleans each take up (high-pass,
//! silence trim, peak normalize) and plays it back or saves it as WAV.

mod app;
mod audio;
mod cli;
mod dsp;
mod models;
mod processing;
mod session;
mod settings;
mod state;

use audio::{PipeWireBackend, StreamConfig, WavRecorder, SAMPLE_RATE};
use clap::Parser;
use log::info;
use session::SessionConfig;
use state::RecordingsIndex;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    info!("Starting sound recorder");

    // Command-line values win and are remembered for next time
    let recordings_dir = match &args.recordings_dir {
        Some(dir) => {
            settings::set_recordings_dir(dir);
            dir.clone()
        }
        None => settings::get_recordings_dir().unwrap_or_else(WavRecorder::default_recordings_dir),
    };
    let channels = match args.channels {
        Some(channels) => {
            settings::set_input_channels(channels);
            channels
        }
        None => settings::get_input_channels().unwrap_or(1),
    };
    info!(
        "Recordings directory: {}, input channels: {}",
        recordings_dir.display(),
        channels
    );

    let index = RecordingsIndex::new();
    match index.load() {
        Ok(recordings) => info!("{} saved recording(s) in index", recordings.len()),
        Err(e) => log::warn!("Failed to load recordings index: {}", e),
    }

    let config = SessionConfig {
        stream: StreamConfig {
            sample_rate: SAMPLE_RATE,
            channels,
        },
        recorder: WavRecorder::new().with_recordings_dir(&recordings_dir),
        index: Some(index),
        auto_save: args.output.clone(),
        ..SessionConfig::default()
    };

    app::run(config, Arc::new(PipeWireBackend::new()))
}
