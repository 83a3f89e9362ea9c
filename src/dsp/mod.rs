//! Post-recording cleanup pipeline
//!
//! Three pure stages applied in a fixed order:
//! - Butterworth high-pass to remove rumble and hum
//! - Leading/trailing silence trim relative to the loudest frame
//! - Peak normalization

mod filter;
mod trim;

pub use filter::HighPass;
pub use trim::trim_silence;

use crate::audio::SAMPLE_RATE;

/// High-pass cutoff frequency in Hz
pub const HIGHPASS_CUTOFF_HZ: f64 = 80.0;

/// Butterworth filter order
pub const HIGHPASS_ORDER: usize = 5;

/// Frames quieter than this many dB below the loudest frame count as silence
pub const SILENCE_TOP_DB: f64 = 60.0;

/// Highest filter order accepted by the designer
const MAX_FILTER_ORDER: usize = 16;

/// Errors from invalid pipeline parameters
#[derive(Debug, Clone, PartialEq)]
pub enum DspError {
    InvalidSampleRate(u32),
    InvalidCutoff { cutoff_hz: f64, nyquist_hz: f64 },
    InvalidOrder(usize),
    InvalidThreshold(f64),
}

impl std::fmt::Display for DspError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DspError::InvalidSampleRate(rate) => write!(f, "Invalid sample rate: {} Hz", rate),
            DspError::InvalidCutoff {
                cutoff_hz,
                nyquist_hz,
            } => write!(
                f,
                "Cutoff {} Hz must lie strictly between 0 and Nyquist ({} Hz)",
                cutoff_hz, nyquist_hz
            ),
            DspError::InvalidOrder(order) => {
                write!(f, "Filter order {} outside 1..={}", order, MAX_FILTER_ORDER)
            }
            DspError::InvalidThreshold(db) => {
                write!(f, "Silence threshold must be a positive dB value, got {}", db)
            }
        }
    }
}

impl std::error::Error for DspError {}

/// Parameters for the cleanup pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct DspParams {
    pub sample_rate: u32,
    pub cutoff_hz: f64,
    pub order: usize,
    pub silence_top_db: f64,
}

impl Default for DspParams {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            cutoff_hz: HIGHPASS_CUTOFF_HZ,
            order: HIGHPASS_ORDER,
            silence_top_db: SILENCE_TOP_DB,
        }
    }
}

impl DspParams {
    /// Check the parameters once, before any audio is processed
    pub fn validate(&self) -> Result<(), DspError> {
        if self.sample_rate == 0 {
            return Err(DspError::InvalidSampleRate(self.sample_rate));
        }
        let nyquist_hz = self.sample_rate as f64 / 2.0;
        if !(self.cutoff_hz > 0.0 && self.cutoff_hz < nyquist_hz) {
            return Err(DspError::InvalidCutoff {
                cutoff_hz: self.cutoff_hz,
                nyquist_hz,
            });
        }
        if self.order == 0 || self.order > MAX_FILTER_ORDER {
            return Err(DspError::InvalidOrder(self.order));
        }
        if !(self.silence_top_db.is_finite() && self.silence_top_db > 0.0) {
            return Err(DspError::InvalidThreshold(self.silence_top_db));
        }
        Ok(())
    }
}

/// The validated filter → trim → normalize chain
#[derive(Debug, Clone)]
pub struct Pipeline {
    highpass: HighPass,
    silence_top_db: f64,
}

impl Pipeline {
    pub fn new(params: &DspParams) -> Result<Self, DspError> {
        params.validate()?;
        Ok(Self {
            highpass: HighPass::butterworth(params.order, params.cutoff_hz, params.sample_rate),
            silence_top_db: params.silence_top_db,
        })
    }

    /// Run all three stages over a complete take
    ///
    /// May return an empty buffer when the take holds no energy.
    pub fn run(&self, samples: &[f32]) -> Vec<f32> {
        let filtered = self.highpass.apply(samples);
        let trimmed = trim_silence(&filtered, self.silence_top_db);
        normalize(&trimmed)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        let params = DspParams::default();
        Self {
            highpass: HighPass::butterworth(params.order, params.cutoff_hz, params.sample_rate),
            silence_top_db: params.silence_top_db,
        }
    }
}

/// Peak absolute amplitude
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Scale so the peak absolute amplitude becomes 1.0. Silent input is returned unchanged.
pub fn normalize(samples: &[f32]) -> Vec<f32> {
    let mut out = samples.to_vec();
    normalize_in_place(&mut out);
    out
}

pub fn normalize_in_place(samples: &mut [f32]) {
    let peak = peak(samples);
    if peak > 0.0 {
        let gain = 1.0 / peak;
        for sample in samples.iter_mut() {
            *sample *= gain;
        }
    }
}
