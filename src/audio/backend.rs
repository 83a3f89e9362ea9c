//! Device boundary shared by capture and playback
//!
//! A backend opens streams on its own thread and hands back a [`StreamHandle`].
//! Closing the handle signals the stream loop and joins the thread, so once
//! `close()` returns no callback is in flight.

use log::warn;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Errors at the audio device boundary
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    DeviceUnavailable(String),
    StreamFailed(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::DeviceUnavailable(e) => write!(f, "Audio device unavailable: {}", e),
            AudioError::StreamFailed(e) => write!(f, "Audio stream failed: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

/// Requested stream format. Samples are always f32 in [-1, 1].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamConfig {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::mono(super::SAMPLE_RATE)
    }
}

/// Called from the stream thread with interleaved samples and the negotiated channel count
pub type FrameHandler = Box<dyn FnMut(&[f32], usize) + Send + 'static>;

/// Device access used by the capture and playback engines
pub trait AudioBackend: Send + Sync {
    /// Open an input stream. Blocks until the stream is connected or has failed.
    fn open_input(
        &self,
        config: StreamConfig,
        on_frames: FrameHandler,
    ) -> Result<StreamHandle, AudioError>;

    /// Open an output stream that plays `samples` once and then goes quiet
    fn open_output(
        &self,
        config: StreamConfig,
        samples: Arc<[f32]>,
    ) -> Result<StreamHandle, AudioError>;
}

/// Owned handle to a running stream thread
pub struct StreamHandle {
    stop: Option<Box<dyn FnOnce() + Send>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn new(stop: impl FnOnce() + Send + 'static, thread: JoinHandle<()>) -> Self {
        Self {
            stop: Some(Box::new(stop)),
            thread: Some(thread),
        }
    }

    /// Signal the stream loop and wait for its thread to exit
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory backend that replays scripted interleaved buffers

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    pub struct ScriptedBackend {
        script: Vec<Vec<f32>>,
        channels: usize,
        interval: Duration,
        input_available: AtomicBool,
        output_available: AtomicBool,
        inputs_opened: AtomicUsize,
        outputs_opened: AtomicUsize,
        outputs_active: Arc<AtomicUsize>,
        last_output: Mutex<Option<Arc<[f32]>>>,
    }

    impl ScriptedBackend {
        /// Backend delivering each buffer in `script` as one callback
        pub fn new(channels: usize, script: Vec<Vec<f32>>) -> Self {
            Self {
                script,
                channels,
                interval: Duration::from_millis(1),
                input_available: AtomicBool::new(true),
                output_available: AtomicBool::new(true),
                inputs_opened: AtomicUsize::new(0),
                outputs_opened: AtomicUsize::new(0),
                outputs_active: Arc::new(AtomicUsize::new(0)),
                last_output: Mutex::new(None),
            }
        }

        /// Backend whose devices cannot be opened
        pub fn unavailable() -> Self {
            let backend = Self::new(1, Vec::new());
            backend.set_input_available(false);
            backend.set_output_available(false);
            backend
        }

        pub fn with_interval(mut self, interval: Duration) -> Self {
            self.interval = interval;
            self
        }

        pub fn set_input_available(&self, available: bool) {
            self.input_available.store(available, Ordering::SeqCst);
        }

        pub fn set_output_available(&self, available: bool) {
            self.output_available.store(available, Ordering::SeqCst);
        }

        pub fn inputs_opened(&self) -> usize {
            self.inputs_opened.load(Ordering::SeqCst)
        }

        pub fn outputs_opened(&self) -> usize {
            self.outputs_opened.load(Ordering::SeqCst)
        }

        pub fn outputs_active(&self) -> usize {
            self.outputs_active.load(Ordering::SeqCst)
        }

        pub fn last_output(&self) -> Option<Arc<[f32]>> {
            self.last_output.lock().unwrap().clone()
        }
    }

    impl AudioBackend for ScriptedBackend {
        fn open_input(
            &self,
            _config: StreamConfig,
            mut on_frames: FrameHandler,
        ) -> Result<StreamHandle, AudioError> {
            if !self.input_available.load(Ordering::SeqCst) {
                return Err(AudioError::DeviceUnavailable("no scripted input".into()));
            }
            self.inputs_opened.fetch_add(1, Ordering::SeqCst);

            let stop = Arc::new(AtomicBool::new(false));
            let script = self.script.clone();
            let channels = self.channels;
            let interval = self.interval;
            let thread = thread::spawn({
                let stop = stop.clone();
                move || {
                    for buffer in script {
                        if stop.load(Ordering::SeqCst) {
                            return;
                        }
                        on_frames(&buffer, channels);
                        thread::sleep(interval);
                    }
                    while !stop.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            });

            Ok(StreamHandle::new(
                move || stop.store(true, Ordering::SeqCst),
                thread,
            ))
        }

        fn open_output(
            &self,
            config: StreamConfig,
            samples: Arc<[f32]>,
        ) -> Result<StreamHandle, AudioError> {
            if !self.output_available.load(Ordering::SeqCst) {
                return Err(AudioError::DeviceUnavailable("no scripted output".into()));
            }
            self.outputs_opened.fetch_add(1, Ordering::SeqCst);
            self.outputs_active.fetch_add(1, Ordering::SeqCst);
            *self.last_output.lock().unwrap() = Some(samples.clone());

            let stop = Arc::new(AtomicBool::new(false));
            let active = self.outputs_active.clone();
            let length =
                Duration::from_secs_f64(samples.len() as f64 / config.sample_rate.max(1) as f64);
            let thread = thread::spawn({
                let stop = stop.clone();
                move || {
                    let started = Instant::now();
                    while !stop.load(Ordering::SeqCst) && started.elapsed() < length {
                        thread::sleep(Duration::from_millis(1));
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            });

            Ok(StreamHandle::new(
                move || stop.store(true, Ordering::SeqCst),
                thread,
            ))
        }
    }
}
