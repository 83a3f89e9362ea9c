//! Audio capture, playback and persistence
//!
//! This module provides:
//! - Microphone capture at 44.1kHz, down-mixed to mono
//! - Take playback with a waveform-driving chunk iterator
//! - 16-bit PCM WAV writing via hound
//!
//! Device access goes through [`AudioBackend`]; PipeWire is the production backend.

mod backend;
mod capture;
mod pipewire_backend;
mod playback;
mod recorder;

pub use backend::{AudioBackend, StreamConfig};
pub use capture::{CaptureEngine, CaptureError};
pub use pipewire_backend::PipeWireBackend;
pub use playback::PlaybackEngine;
pub use recorder::WavRecorder;

#[cfg(test)]
pub use backend::testing;
#[cfg(test)]
pub use recorder::to_pcm16;

/// Fixed capture and playback sample rate
pub const SAMPLE_RATE: u32 = 44100;
