//! WAV file writing using hound
//!
//! Takes are saved as 16-bit signed PCM, mono, at the take's sample rate.

use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Errors while persisting a take
#[derive(Debug)]
pub enum SaveError {
    CreateDir(PathBuf, std::io::Error),
    CreateFile(PathBuf, std::io::Error),
    Wav(hound::Error),
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::CreateDir(path, e) => {
                write!(f, "Failed to create directory {}: {}", path.display(), e)
            }
            SaveError::CreateFile(path, e) => {
                write!(f, "Failed to create file {}: {}", path.display(), e)
            }
            SaveError::Wav(e) => write!(f, "Failed to write WAV data: {}", e),
        }
    }
}

impl std::error::Error for SaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SaveError::CreateDir(_, e) | SaveError::CreateFile(_, e) => Some(e),
            SaveError::Wav(e) => Some(e),
        }
    }
}

impl From<hound::Error> for SaveError {
    fn from(e: hound::Error) -> Self {
        SaveError::Wav(e)
    }
}

/// Convert a float sample to 16-bit PCM: `round(clamp(x, -1, 1) * 32767)`
pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// WAV file recorder
#[derive(Clone, Debug)]
pub struct WavRecorder {
    spec: WavSpec,
    recordings_dir: PathBuf,
}

impl WavRecorder {
    /// Create a new WAV recorder
    ///
    /// Uses 44.1kHz mono 16-bit PCM by default
    pub fn new() -> Self {
        let spec = WavSpec {
            channels: 1,
            sample_rate: super::SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        Self {
            spec,
            recordings_dir: Self::default_recordings_dir(),
        }
    }

    /// Default recordings directory under the user's local data dir
    pub fn default_recordings_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sound-recorder")
            .join("recordings")
    }

    /// Set the recordings directory
    pub fn with_recordings_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.recordings_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.spec.sample_rate = rate;
        self
    }

    /// Generate a unique filename for a new recording
    pub fn generate_filename(&self) -> PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let uuid = uuid::Uuid::new_v4().to_string()[..8].to_string();
        self.recordings_dir
            .join(format!("recording_{}_{}.wav", timestamp, uuid))
    }

    /// Save samples to a WAV file
    ///
    /// Missing parent directories are created. Returns the path written.
    pub fn save(&self, samples: &[f32], path: Option<&Path>) -> Result<PathBuf, SaveError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self.generate_filename(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SaveError::CreateDir(parent.to_path_buf(), e))?;
        }

        let file = File::create(&path).map_err(|e| SaveError::CreateFile(path.clone(), e))?;
        let mut wav_writer = WavWriter::new(BufWriter::new(file), self.spec)?;

        for &sample in samples {
            wav_writer.write_sample(to_pcm16(sample))?;
        }

        wav_writer.finalize()?;
        Ok(path)
    }
}

impl Default for WavRecorder {
    fn default() -> Self {
        Self::new()
    }
}
