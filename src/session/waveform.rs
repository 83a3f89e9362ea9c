/// Number of samples shown in the scrolling waveform
pub const WAVEFORM_CAPACITY: usize = 2000;

/// Fixed-size sliding window of the most recent samples, oldest first
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    samples: Vec<f32>,
}

impl RollingBuffer {
    /// A buffer of `capacity` zero samples
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shift left by the chunk length and append the chunk.
    /// Chunks longer than the buffer keep only their newest samples.
    pub fn push(&mut self, chunk: &[f32]) {
        let capacity = self.samples.len();
        let chunk = &chunk[chunk.len().saturating_sub(capacity)..];
        let n = chunk.len();
        if n == 0 {
            return;
        }
        self.samples.copy_within(n.., 0);
        self.samples[capacity - n..].copy_from_slice(chunk);
    }
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new(WAVEFORM_CAPACITY)
    }
}
