//! Microphone capture
//!
//! Each device callback is down-mixed to mono, appended to the take and
//! forwarded to the session as a waveform chunk. Pausing discards frames
//! without closing the device.

use super::backend::{AudioBackend, AudioError, StreamConfig, StreamHandle};
use crate::dsp;
use crate::models::Take;
use crate::session::{ChunkSource, EventSender, SessionEvent};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Errors from the capture engine
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    Device(AudioError),
    AlreadyRunning,
    NotRunning,
    EmptyTake,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Device(e) => write!(f, "{}", e),
            CaptureError::AlreadyRunning => write!(f, "Capture already running"),
            CaptureError::NotRunning => write!(f, "Capture not running"),
            CaptureError::EmptyTake => write!(f, "No audio was captured"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<AudioError> for CaptureError {
    fn from(e: AudioError) -> Self {
        CaptureError::Device(e)
    }
}

/// Average interleaved frames down to one channel
pub fn downmix_to_mono(out: &mut Vec<f32>, data: &[f32], channels: usize) {
    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }
    out.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
    );
}

/// Capture engine owning the input stream for one take at a time
pub struct CaptureEngine {
    backend: Arc<dyn AudioBackend>,
    config: StreamConfig,
    events: EventSender,
    /// Accumulated mono samples. Only the stream thread touches this while running.
    take: Arc<Mutex<Vec<f32>>>,
    paused: Arc<AtomicBool>,
    discarded: Arc<AtomicUsize>,
    /// Id of the most recently started take, carried by its chunks
    take_id: u64,
    stream: Option<StreamHandle>,
}

impl CaptureEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, config: StreamConfig, events: EventSender) -> Self {
        Self {
            backend,
            config,
            events,
            take: Arc::new(Mutex::new(Vec::new())),
            paused: Arc::new(AtomicBool::new(false)),
            discarded: Arc::new(AtomicUsize::new(0)),
            take_id: 0,
            stream: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    #[cfg(test)]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Open the input device and start accumulating a new take
    ///
    /// Returns the id tagged onto every chunk of this take.
    pub fn start(&mut self) -> Result<u64, CaptureError> {
        if self.stream.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        self.take
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.paused.store(false, Ordering::SeqCst);
        self.discarded.store(0, Ordering::SeqCst);

        let take = self.take.clone();
        let paused = self.paused.clone();
        let discarded = self.discarded.clone();
        let events = self.events.clone();
        let take_id = self.take_id + 1;
        let source = ChunkSource::Capture(take_id);

        let handler = Box::new(move |data: &[f32], channels: usize| {
            if paused.load(Ordering::Relaxed) {
                discarded.fetch_add(data.len() / channels.max(1), Ordering::Relaxed);
                return;
            }

            let mut mono = Vec::with_capacity(data.len() / channels.max(1));
            downmix_to_mono(&mut mono, data, channels);
            if mono.is_empty() {
                return;
            }

            take.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&mono);
            // The session may already be gone during shutdown
            let _ = events.send(SessionEvent::Chunk {
                source,
                samples: mono,
            });
        });

        let stream = self.backend.open_input(self.config, handler)?;
        info!(
            "Capture started ({} Hz, {} channel(s))",
            self.config.sample_rate, self.config.channels
        );
        self.take_id = take_id;
        self.stream = Some(stream);
        Ok(take_id)
    }

    /// Stop forwarding and accumulating; the device stays open
    pub fn pause(&self) {
        if self.stream.is_some() {
            self.paused.store(true, Ordering::SeqCst);
            debug!("Capture paused");
        }
    }

    pub fn resume(&self) {
        if self.stream.is_some() {
            self.paused.store(false, Ordering::SeqCst);
            debug!("Capture resumed");
        }
    }

    /// Close the device, wait for the stream thread, and return the peak-normalized take
    pub fn stop(&mut self) -> Result<Take, CaptureError> {
        let stream = self.stream.take().ok_or(CaptureError::NotRunning)?;

        // Joins the stream thread: no callback can touch the take after this
        stream.close();
        self.paused.store(false, Ordering::SeqCst);

        let mut samples =
            std::mem::take(&mut *self.take.lock().unwrap_or_else(PoisonError::into_inner));
        info!(
            "Capture stopped: {} samples kept, {} frames discarded while paused",
            samples.len(),
            self.discarded.load(Ordering::SeqCst)
        );

        if samples.is_empty() {
            return Err(CaptureError::EmptyTake);
        }

        dsp::normalize_in_place(&mut samples);
        Ok(Take::new(samples, self.config.sample_rate))
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
    }
}
