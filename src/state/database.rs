//! JSON index of saved recordings
//!
//! Stores recording metadata in a JSON file at ~/.local/share/sound-recorder/recordings.json

use crate::models::RecordingInfo;
use std::fs;
use std::path::{Path, PathBuf};

/// Errors reading or writing the index
#[derive(Debug)]
pub enum IndexError {
    Io(PathBuf, std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Io(path, e) => write!(f, "Recordings index {}: {}", path.display(), e),
            IndexError::Json(e) => write!(f, "Recordings index is malformed: {}", e),
        }
    }
}

impl std::error::Error for IndexError {}

/// Index of saved recordings, newest first
pub struct RecordingsIndex {
    path: PathBuf,
}

impl RecordingsIndex {
    /// Create an index at the default location
    pub fn new() -> Self {
        Self {
            path: Self::default_path(),
        }
    }

    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the default index path
    fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sound-recorder")
            .join("recordings.json")
    }

    /// Ensure the index directory exists
    fn ensure_dir(&self) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| IndexError::Io(parent.to_path_buf(), e))?;
        }
        Ok(())
    }

    /// Load recordings from the index. A missing file is an empty index.
    pub fn load(&self) -> Result<Vec<RecordingInfo>, IndexError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents =
            fs::read_to_string(&self.path).map_err(|e| IndexError::Io(self.path.clone(), e))?;

        serde_json::from_str(&contents).map_err(IndexError::Json)
    }

    /// Save recordings to the index
    pub fn save(&self, recordings: &[RecordingInfo]) -> Result<(), IndexError> {
        self.ensure_dir()?;

        let contents = serde_json::to_string_pretty(recordings).map_err(IndexError::Json)?;

        fs::write(&self.path, contents).map_err(|e| IndexError::Io(self.path.clone(), e))
    }

    /// Record a newly saved take. Re-saving the same path replaces its entry.
    pub fn add_recording(&self, recording: RecordingInfo) -> Result<(), IndexError> {
        let mut existing = self.load()?;
        existing.retain(|r| r.path != recording.path);
        existing.insert(0, recording);
        self.save(&existing)
    }
}

impl Default for RecordingsIndex {
    fn default() -> Self {
        Self::new()
    }
}
