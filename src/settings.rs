//! Application settings persistence using dconf
//!
//! Settings are stored in dconf under `/com/sound-recorder/`

use log::error;
use std::path::{Path, PathBuf};

const DCONF_PATH: &str = "/com/sound-recorder/";

/// Keys for dconf settings
mod keys {
    pub const RECORDINGS_DIR: &str = "recordings-dir";
    pub const INPUT_CHANNELS: &str = "input-channels";
}

fn key(name: &str) -> String {
    format!("{}{}", DCONF_PATH, name)
}

/// Get the last used recordings directory from dconf
pub fn get_recordings_dir() -> Option<PathBuf> {
    dconf_rs::get_string(&key(keys::RECORDINGS_DIR))
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

/// Set the recordings directory in dconf
pub fn set_recordings_dir(dir: &Path) {
    if let Err(e) = dconf_rs::set_string(&key(keys::RECORDINGS_DIR), &dir.to_string_lossy()) {
        error!("Failed to save recordings directory to dconf: {}", e);
    }
}

/// Get the requested input channel count from dconf
pub fn get_input_channels() -> Option<u16> {
    dconf_rs::get_string(&key(keys::INPUT_CHANNELS))
        .ok()
        .and_then(|s| parse_channels(&s))
}

/// Set the input channel count in dconf
pub fn set_input_channels(channels: u16) {
    if let Err(e) = dconf_rs::set_string(&key(keys::INPUT_CHANNELS), &channels.to_string()) {
        error!("Failed to save input channels to dconf: {}", e);
    }
}

fn parse_channels(value: &str) -> Option<u16> {
    value
        .trim()
        .trim_matches('\'')
        .parse::<u16>()
        .ok()
        .filter(|&n| n > 0)
}
