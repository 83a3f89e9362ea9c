use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// A complete mono recording
///
/// Samples are shared so playback can stream them without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct Take {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl Take {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn shared(&self) -> Arc<[f32]> {
        self.samples.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }
}

/// Information about a saved recording
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingInfo {
    pub file_name: String,
    pub path: PathBuf,
    pub title: String,
    pub date: DateTime<Utc>,
    pub duration_seconds: f64,
    pub sample_count: usize,
}

impl RecordingInfo {
    pub fn new(path: PathBuf, take: &Take) -> Self {
        let now = Utc::now();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            file_name,
            path,
            title: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            date: now,
            duration_seconds: take.duration_seconds(),
            sample_count: take.len(),
        }
    }
}
