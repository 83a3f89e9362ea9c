//! Take playback
//!
//! Device output and waveform updates run side by side: the output stream
//! plays the whole take continuously, while a driver thread forwards
//! fixed-size chunks to the session at a fixed cadence so the waveform view
//! follows the approximate playback position.

use super::backend::{AudioBackend, AudioError, StreamConfig, StreamHandle};
use crate::models::Take;
use crate::session::{ChunkSource, EventSender, SessionEvent};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Samples per waveform update
pub const PLAYBACK_CHUNK_SAMPLES: usize = 1024;

/// Waveform refresh cadence during playback (~50 updates/sec)
pub const PLAYBACK_UPDATE_INTERVAL: Duration = Duration::from_millis(20);

struct ActivePlayback {
    generation: u64,
    output: StreamHandle,
    driver_stop: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

impl ActivePlayback {
    fn stop_driver(&self) {
        self.driver_stop.store(true, Ordering::SeqCst);
    }
}

/// Single-playback engine
pub struct PlaybackEngine {
    backend: Arc<dyn AudioBackend>,
    events: EventSender,
    chunk_samples: usize,
    interval: Duration,
    generation: u64,
    active: Option<ActivePlayback>,
    /// Output left to finish on its own after the driver reached the end
    draining: Option<StreamHandle>,
}

impl PlaybackEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, events: EventSender) -> Self {
        Self {
            backend,
            events,
            chunk_samples: PLAYBACK_CHUNK_SAMPLES,
            interval: PLAYBACK_UPDATE_INTERVAL,
            generation: 0,
            active: None,
            draining: None,
        }
    }

    #[cfg(test)]
    pub fn with_cadence(mut self, chunk_samples: usize, interval: Duration) -> Self {
        self.chunk_samples = chunk_samples.max(1);
        self.interval = interval;
        self
    }

    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    /// Generation of the current playback, if any
    #[cfg(test)]
    pub fn current_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.generation)
    }

    /// Start playing `take`, superseding any playback in progress
    ///
    /// Returns the generation tag carried by this playback's finish event.
    pub fn play(&mut self, take: &Take) -> Result<u64, AudioError> {
        self.stop();

        let samples = take.shared();
        let output = self
            .backend
            .open_output(StreamConfig::mono(take.sample_rate()), samples.clone())?;

        self.generation += 1;
        let generation = self.generation;
        let driver_stop = Arc::new(AtomicBool::new(false));
        let driver = thread::spawn({
            let stop = driver_stop.clone();
            let events = self.events.clone();
            let chunk_samples = self.chunk_samples;
            let interval = self.interval;
            move || drive_waveform(samples, chunk_samples, interval, generation, stop, events)
        });

        info!(
            "Playback #{} started ({} samples, {:.1}s)",
            generation,
            take.len(),
            take.duration_seconds()
        );
        self.active = Some(ActivePlayback {
            generation,
            output,
            driver_stop,
            driver,
        });
        Ok(generation)
    }

    /// Halt the waveform driver and device output together
    pub fn stop(&mut self) -> bool {
        if let Some(draining) = self.draining.take() {
            draining.close();
        }

        let Some(active) = self.active.take() else {
            return false;
        };

        active.stop_driver();
        if active.driver.join().is_err() {
            warn!("Playback driver thread panicked");
        }
        active.output.close();
        info!("Playback #{} stopped", active.generation);
        true
    }

    /// Handle the driver reaching the end of the take.
    ///
    /// Returns false for finish events from superseded playbacks. Device output
    /// is left to drain on its own.
    pub fn finish(&mut self, generation: u64) -> bool {
        match &self.active {
            Some(active) if active.generation == generation => {}
            _ => {
                debug!("Ignoring finish from stale playback #{}", generation);
                return false;
            }
        }

        if let Some(active) = self.active.take() {
            if active.driver.join().is_err() {
                warn!("Playback driver thread panicked");
            }
            if let Some(previous) = self.draining.replace(active.output) {
                previous.close();
            }
            info!("Playback #{} reached end of take", generation);
        }
        true
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drive_waveform(
    samples: Arc<[f32]>,
    chunk_samples: usize,
    interval: Duration,
    generation: u64,
    stop: Arc<AtomicBool>,
    events: EventSender,
) {
    for chunk in samples.chunks(chunk_samples) {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let event = SessionEvent::Chunk {
            source: ChunkSource::Playback(generation),
            samples: chunk.to_vec(),
        };
        if events.send(event).is_err() {
            return;
        }
        thread::sleep(interval);
    }
    if !stop.load(Ordering::SeqCst) {
        let _ = events.send(SessionEvent::PlaybackFinished { generation });
    }
}
