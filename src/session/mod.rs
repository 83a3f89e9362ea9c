//! Session controller
//!
//! Owns the recorder state machine. All transitions, the rolling waveform and
//! the elapsed-time counter live on the controller's thread; capture, playback
//! and post-processing only push [`SessionEvent`]s into its channel.
//!
//! ```text
//! Idle/Stopped --record--> Recording <--pause--> Paused
//! Recording/Paused --stop--> Stopped --play--> Playing --end/stop--> Stopped
//! ```

mod waveform;

pub use waveform::{RollingBuffer, WAVEFORM_CAPACITY};

use crate::audio::{
    AudioBackend, CaptureEngine, CaptureError, PlaybackEngine, StreamConfig, WavRecorder,
};
use crate::dsp::{DspError, DspParams, Pipeline};
use crate::models::{RecordingInfo, Take};
use crate::processing::PostProcessor;
use crate::state::RecordingsIndex;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Producer of a waveform chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSource {
    /// Take id returned by the capture engine
    Capture(u64),
    /// Playback generation
    Playback(u64),
}

/// Messages pushed to the controller from producer threads
#[derive(Debug)]
pub enum SessionEvent {
    /// Mono samples from capture or playback, in production order
    Chunk {
        source: ChunkSource,
        samples: Vec<f32>,
    },
    /// The playback driver reached the end of the take
    PlaybackFinished { generation: u64 },
    /// Post-processing finished; the take may be empty
    Processed { job: u64, take: Take },
}

/// User commands from the UI boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Record,
    /// Pause while recording, resume while paused
    Pause,
    Stop,
    Play,
    /// Write the current take to a path, or keep it in memory only when `None`
    Save(Option<PathBuf>),
    Discard,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Paused,
    Stopped,
    Playing,
}

/// Which controls the UI should enable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub record: bool,
    pub pause: bool,
    pub stop: bool,
    pub play: bool,
    pub pause_label: &'static str,
}

/// User-visible outcomes
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    RecordingStarted,
    DeviceUnavailable(String),
    EmptyTake,
    ProcessingBusy,
    Processing,
    SilenceExhaustedTake,
    TakeReady {
        samples: usize,
        duration_seconds: f64,
    },
    Saved(PathBuf),
    SaveFailed {
        path: PathBuf,
        error: String,
    },
    KeptInMemory,
    Discarded,
}

/// UI boundary fed by the controller
pub trait View: Send {
    fn waveform(&mut self, samples: &[f32]);
    fn elapsed(&mut self, text: &str);
    fn controls(&mut self, controls: ControlState);
    fn notice(&mut self, notice: Notice);
}

/// Render seconds as `MM:SS`
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub struct SessionConfig {
    pub stream: StreamConfig,
    pub dsp: DspParams,
    pub recorder: WavRecorder,
    pub index: Option<RecordingsIndex>,
    /// Write every processed take here without asking
    pub auto_save: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            dsp: DspParams::default(),
            recorder: WavRecorder::new(),
            index: None,
            auto_save: None,
        }
    }
}

pub struct Session {
    state: SessionState,
    capture: CaptureEngine,
    playback: PlaybackEngine,
    post: PostProcessor,
    recorder: WavRecorder,
    index: Option<RecordingsIndex>,
    auto_save: Option<PathBuf>,
    waveform: RollingBuffer,
    /// Only chunks from the latest capture or playback reach the waveform
    waveform_source: Option<ChunkSource>,
    elapsed_seconds: u64,
    take: Option<Take>,
    view: Box<dyn View>,
}

impl Session {
    /// Build a session and the receiver its producers push into
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn AudioBackend>,
        view: Box<dyn View>,
    ) -> Result<(Self, EventReceiver), DspError> {
        let pipeline = Pipeline::new(&config.dsp)?;
        let (events, receiver) = mpsc::unbounded_channel();

        let session = Self {
            state: SessionState::Idle,
            capture: CaptureEngine::new(backend.clone(), config.stream, events.clone()),
            playback: PlaybackEngine::new(backend, events.clone()),
            post: PostProcessor::new(pipeline, events),
            recorder: config.recorder,
            index: config.index,
            auto_save: config.auto_save,
            waveform: RollingBuffer::default(),
            waveform_source: None,
            elapsed_seconds: 0,
            take: None,
            view,
        };
        Ok((session, receiver))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    #[cfg(test)]
    pub fn take(&self) -> Option<&Take> {
        self.take.as_ref()
    }

    #[cfg(test)]
    pub fn waveform(&self) -> &[f32] {
        self.waveform.samples()
    }

    #[cfg(test)]
    pub fn is_processing(&self) -> bool {
        self.post.is_busy()
    }

    fn has_playable_take(&self) -> bool {
        self.take.as_ref().is_some_and(|t| !t.is_empty())
    }

    pub fn controls(&self) -> ControlState {
        use SessionState::*;
        ControlState {
            record: matches!(self.state, Idle | Stopped) && !self.post.is_busy(),
            pause: matches!(self.state, Recording | Paused),
            stop: matches!(self.state, Recording | Paused | Playing),
            play: matches!(self.state, Stopped | Playing) && self.has_playable_take(),
            pause_label: if self.state == Paused { "Resume" } else { "Pause" },
        }
    }

    /// Push the initial state to the view
    pub fn render(&mut self) {
        let controls = self.controls();
        self.view.controls(controls);
        self.view.elapsed(&format_elapsed(self.elapsed_seconds));
        self.view.waveform(self.waveform.samples());
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session {:?} -> {:?}", self.state, state);
            self.state = state;
        }
        let controls = self.controls();
        self.view.controls(controls);
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Record => self.record(),
            Command::Pause => self.toggle_pause(),
            Command::Stop => self.stop(),
            Command::Play => self.play(),
            Command::Save(path) => self.save(path),
            Command::Discard => self.discard(),
            Command::Quit => self.shutdown(),
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Chunk { source, samples } => {
                if self.waveform_source != Some(source) {
                    debug!("Dropping stale chunk from {:?}", source);
                    return;
                }
                self.waveform.push(&samples);
                self.view.waveform(self.waveform.samples());
            }
            SessionEvent::PlaybackFinished { generation } => {
                if self.playback.finish(generation) && self.state == SessionState::Playing {
                    self.set_state(SessionState::Stopped);
                }
            }
            SessionEvent::Processed { job, take } => self.on_processed(job, take),
        }
    }

    /// Once-per-second timer tick
    pub fn tick_second(&mut self) {
        if self.state == SessionState::Recording {
            self.elapsed_seconds += 1;
            self.view.elapsed(&format_elapsed(self.elapsed_seconds));
        }
    }

    fn record(&mut self) {
        if !matches!(self.state, SessionState::Idle | SessionState::Stopped) {
            debug!("Ignoring record in {:?}", self.state);
            return;
        }
        if self.post.is_busy() {
            info!("Record rejected: previous take is still being processed");
            self.view.notice(Notice::ProcessingBusy);
            return;
        }

        // Anything still draining from a finished playback goes too
        self.playback.stop();

        let take_id = match self.capture.start() {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to start recording: {}", e);
                let message = match e {
                    CaptureError::Device(device) => device.to_string(),
                    other => other.to_string(),
                };
                self.view.notice(Notice::DeviceUnavailable(message));
                return;
            }
        };
        self.waveform_source = Some(ChunkSource::Capture(take_id));

        if self.take.take().is_some() {
            info!("Discarding previous take");
        }
        self.elapsed_seconds = 0;
        self.view.elapsed(&format_elapsed(0));
        info!("Recording started");
        self.view.notice(Notice::RecordingStarted);
        self.set_state(SessionState::Recording);
    }

    fn toggle_pause(&mut self) {
        match self.state {
            SessionState::Recording => {
                self.capture.pause();
                info!("Recording paused at {}", format_elapsed(self.elapsed_seconds));
                self.set_state(SessionState::Paused);
            }
            SessionState::Paused => {
                self.capture.resume();
                info!("Recording resumed");
                self.set_state(SessionState::Recording);
            }
            other => debug!("Ignoring pause in {:?}", other),
        }
    }

    fn stop(&mut self) {
        match self.state {
            SessionState::Recording | SessionState::Paused => {
                let result = self.capture.stop();
                self.set_state(SessionState::Stopped);
                match result {
                    Ok(take) => {
                        info!(
                            "Recording stopped: {} samples ({:.1}s)",
                            take.len(),
                            take.duration_seconds()
                        );
                        match self.post.submit(take) {
                            Ok(job) => {
                                debug!("Submitted post-processing job #{}", job);
                                self.view.notice(Notice::Processing);
                            }
                            Err(busy) => {
                                warn!("{}", busy);
                                self.view.notice(Notice::ProcessingBusy);
                            }
                        }
                        // Record stays disabled until the job reports back
                        let controls = self.controls();
                        self.view.controls(controls);
                    }
                    Err(CaptureError::EmptyTake) => {
                        info!("Recording stopped with no audio captured");
                        self.view.notice(Notice::EmptyTake);
                    }
                    Err(e) => error!("Failed to stop recording: {}", e),
                }
            }
            SessionState::Playing => {
                self.playback.stop();
                self.set_state(SessionState::Stopped);
            }
            other => debug!("Ignoring stop in {:?}", other),
        }
    }

    fn play(&mut self) {
        if !matches!(self.state, SessionState::Stopped | SessionState::Playing) {
            debug!("Ignoring play in {:?}", self.state);
            return;
        }
        let Some(take) = self.take.clone().filter(|t| !t.is_empty()) else {
            debug!("Ignoring play: no playable take");
            return;
        };

        match self.playback.play(&take) {
            Ok(generation) => {
                self.waveform_source = Some(ChunkSource::Playback(generation));
                self.set_state(SessionState::Playing);
            }
            Err(e) => {
                error!("Failed to start playback: {}", e);
                self.view.notice(Notice::DeviceUnavailable(e.to_string()));
                // The previous playback, if any, was already stopped
                self.set_state(SessionState::Stopped);
            }
        }
    }

    fn on_processed(&mut self, job: u64, take: Take) {
        if !self.post.complete(job) {
            warn!("Ignoring result of unknown post-processing job #{}", job);
            return;
        }

        if take.is_empty() {
            info!("Processed take is empty: recording was entirely silence");
            self.take = Some(take);
            self.view.notice(Notice::SilenceExhaustedTake);
        } else {
            self.view.notice(Notice::TakeReady {
                samples: take.len(),
                duration_seconds: take.duration_seconds(),
            });
            self.take = Some(take);
            if let Some(path) = self.auto_save.clone() {
                self.persist(path);
            }
        }

        let controls = self.controls();
        self.view.controls(controls);
    }

    fn save(&mut self, path: Option<PathBuf>) {
        if self.take.is_none() {
            debug!("Ignoring save: no take");
            return;
        }
        match path {
            Some(path) => self.persist(path),
            None => {
                info!("Keeping take in memory only");
                self.view.notice(Notice::KeptInMemory);
            }
        }
    }

    /// Write the current take. On failure it stays in memory so saving can be retried.
    fn persist(&mut self, path: PathBuf) {
        let Some(take) = self.take.as_ref() else {
            return;
        };
        if take.is_empty() {
            warn!("Not writing {}: take is empty", path.display());
            self.view.notice(Notice::SilenceExhaustedTake);
            return;
        }

        let recorder = self.recorder.clone().with_sample_rate(take.sample_rate());
        match recorder.save(take.samples(), Some(&path)) {
            Ok(written) => {
                info!(
                    "Saved recording to {} ({} samples)",
                    written.display(),
                    take.len()
                );
                if let Some(index) = &self.index {
                    if let Err(e) = index.add_recording(RecordingInfo::new(written.clone(), take)) {
                        warn!("Failed to update recordings index: {}", e);
                    }
                }
                self.view.notice(Notice::Saved(written));
            }
            Err(e) => {
                error!("Failed to save recording: {}", e);
                self.view.notice(Notice::SaveFailed {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }

    fn discard(&mut self) {
        if self.state != SessionState::Stopped || self.take.is_none() {
            debug!("Ignoring discard in {:?}", self.state);
            return;
        }
        self.take = None;
        info!("Take discarded");
        self.view.notice(Notice::Discarded);
        self.set_state(SessionState::Idle);
    }

    /// Release devices before exit. An unsaved take is dropped.
    pub fn shutdown(&mut self) {
        if self.capture.is_running() {
            let _ = self.capture.stop();
        }
        self.playback.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::ScriptedBackend;
    use crate::audio::{to_pcm16, SAMPLE_RATE};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ViewLog {
        notices: Vec<Notice>,
        controls: Vec<ControlState>,
        elapsed: Vec<String>,
        waveform_updates: usize,
    }

    #[derive(Clone, Default)]
    struct RecordingView(Arc<Mutex<ViewLog>>);

    impl RecordingView {
        fn notices(&self) -> Vec<Notice> {
            self.0.lock().unwrap().notices.clone()
        }

        fn last_controls(&self) -> Option<ControlState> {
            self.0.lock().unwrap().controls.last().copied()
        }

        fn last_elapsed(&self) -> Option<String> {
            self.0.lock().unwrap().elapsed.last().cloned()
        }
    }

    impl View for RecordingView {
        fn waveform(&mut self, samples: &[f32]) {
            assert_eq!(samples.len(), WAVEFORM_CAPACITY);
            self.0.lock().unwrap().waveform_updates += 1;
        }

        fn elapsed(&mut self, text: &str) {
            self.0.lock().unwrap().elapsed.push(text.to_string());
        }

        fn controls(&mut self, controls: ControlState) {
            self.0.lock().unwrap().controls.push(controls);
        }

        fn notice(&mut self, notice: Notice) {
            self.0.lock().unwrap().notices.push(notice);
        }
    }

    fn tone_script(chunks: usize) -> Vec<Vec<f32>> {
        (0..chunks)
            .map(|c| {
                (0..1024)
                    .map(|i| {
                        let n = (c * 1024 + i) as f32;
                        0.5 * (2.0 * std::f32::consts::PI * 440.0 * n / SAMPLE_RATE as f32).sin()
                    })
                    .collect()
            })
            .collect()
    }

    fn session_with(
        backend: Arc<ScriptedBackend>,
        config: SessionConfig,
    ) -> (Session, EventReceiver, RecordingView) {
        let view = RecordingView::default();
        let (session, rx) = Session::new(config, backend, Box::new(view.clone())).unwrap();
        (session, rx, view)
    }

    fn session(backend: Arc<ScriptedBackend>) -> (Session, EventReceiver, RecordingView) {
        session_with(backend, SessionConfig::default())
    }

    /// Feed events to the session until `done` matches one (inclusive)
    fn pump_until(
        session: &mut Session,
        rx: &mut EventReceiver,
        mut done: impl FnMut(&SessionEvent) -> bool,
    ) {
        loop {
            let event = rx.blocking_recv().expect("event channel closed");
            let last = done(&event);
            session.handle_event(event);
            if last {
                break;
            }
        }
    }

    fn pump_chunks(session: &mut Session, rx: &mut EventReceiver, count: usize) {
        let mut seen = 0;
        pump_until(session, rx, |event| {
            if matches!(event, SessionEvent::Chunk { .. }) {
                seen += 1;
            }
            seen == count
        });
    }

    fn pump_processed(session: &mut Session, rx: &mut EventReceiver) {
        pump_until(session, rx, |event| {
            matches!(event, SessionEvent::Processed { .. })
        });
    }

    /// Record `chunks` scripted tone chunks, stop, and wait for the processed take
    fn record_take(session: &mut Session, rx: &mut EventReceiver, chunks: usize) {
        session.handle_command(Command::Record);
        pump_chunks(session, rx, chunks);
        session.handle_command(Command::Stop);
        pump_processed(session, rx);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(65), "01:05");
        assert_eq!(format_elapsed(3600), "60:00");
    }

    #[test]
    fn test_initial_controls() {
        let (mut session, _rx, view) = session(Arc::new(ScriptedBackend::new(1, Vec::new())));
        session.render();
        assert_eq!(session.state(), SessionState::Idle);
        let controls = view.last_controls().unwrap();
        assert!(controls.record);
        assert!(!controls.pause);
        assert!(!controls.stop);
        assert!(!controls.play);
        assert_eq!(controls.pause_label, "Pause");
        assert_eq!(view.last_elapsed().as_deref(), Some("00:00"));
        assert!(session.waveform().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_record_stop_save_end_to_end() {
        let backend = Arc::new(ScriptedBackend::new(1, tone_script(3)));
        let (mut session, mut rx, view) = session(backend.clone());
        let dir = tempfile::tempdir().unwrap();

        session.handle_command(Command::Record);
        assert_eq!(session.state(), SessionState::Recording);
        let controls = view.last_controls().unwrap();
        assert!(!controls.record && controls.pause && controls.stop && !controls.play);

        pump_chunks(&mut session, &mut rx, 3);
        assert!(session.waveform()[WAVEFORM_CAPACITY - 1024..]
            .iter()
            .any(|&s| s != 0.0));

        session.handle_command(Command::Stop);
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.is_processing());
        let controls = view.last_controls().unwrap();
        assert!(!controls.record && !controls.play);

        pump_processed(&mut session, &mut rx);
        assert!(!session.is_processing());
        let take = session.take().cloned().unwrap();
        assert!(!take.is_empty());
        assert!(take.len() <= 3 * 1024);
        assert!((crate::dsp::peak(take.samples()) - 1.0).abs() < 1e-6);
        assert!(view.notices().contains(&Notice::TakeReady {
            samples: take.len(),
            duration_seconds: take.duration_seconds(),
        }));
        let controls = view.last_controls().unwrap();
        assert!(controls.record && controls.play);

        let target = dir.path().join("take.wav");
        session.handle_command(Command::Save(Some(target.clone())));
        assert!(view.notices().contains(&Notice::Saved(target.clone())));

        let mut reader = hound::WavReader::open(&target).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().bits_per_sample, 16);
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), take.len());
        for (&got, &sample) in decoded.iter().zip(take.samples()) {
            assert!((got as i32 - to_pcm16(sample) as i32).abs() <= 1);
        }
        assert_eq!(backend.inputs_opened(), 1);
    }

    #[test]
    fn test_pause_gates_timer_and_toggles_label() {
        let backend = Arc::new(ScriptedBackend::new(1, Vec::new()));
        let (mut session, _rx, view) = session(backend);

        session.handle_command(Command::Pause);
        assert_eq!(session.state(), SessionState::Idle);

        session.handle_command(Command::Record);
        session.tick_second();
        assert_eq!(session.elapsed_seconds(), 1);

        session.handle_command(Command::Pause);
        assert_eq!(session.state(), SessionState::Paused);
        assert_eq!(view.last_controls().unwrap().pause_label, "Resume");
        session.tick_second();
        session.tick_second();
        assert_eq!(session.elapsed_seconds(), 1);

        session.handle_command(Command::Pause);
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(view.last_controls().unwrap().pause_label, "Pause");
        session.tick_second();
        assert_eq!(session.elapsed_seconds(), 2);
        assert_eq!(view.last_elapsed().as_deref(), Some("00:02"));

        session.handle_command(Command::Stop);
        session.tick_second();
        assert_eq!(session.elapsed_seconds(), 2);
    }

    #[test]
    fn test_stop_right_after_record_is_empty_take() {
        let backend = Arc::new(ScriptedBackend::new(1, Vec::new()));
        let (mut session, _rx, view) = session(backend);

        session.handle_command(Command::Record);
        session.handle_command(Command::Stop);

        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.take().is_none());
        assert!(!session.is_processing());
        assert!(view.notices().contains(&Notice::EmptyTake));
        let controls = view.last_controls().unwrap();
        assert!(controls.record);
        assert!(!controls.play);
    }

    #[test]
    fn test_unavailable_device_leaves_state_unchanged() {
        let backend = Arc::new(ScriptedBackend::unavailable());
        let (mut session, _rx, view) = session(backend.clone());

        session.handle_command(Command::Record);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(backend.inputs_opened(), 0);
        assert!(matches!(
            view.notices().as_slice(),
            [Notice::DeviceUnavailable(_)]
        ));
    }

    #[test]
    fn test_play_without_take_is_noop() {
        let backend = Arc::new(ScriptedBackend::new(1, Vec::new()));
        let (mut session, _rx, _view) = session(backend.clone());

        session.handle_command(Command::Play);
        assert_eq!(session.state(), SessionState::Idle);

        session.handle_command(Command::Record);
        session.handle_command(Command::Stop);
        session.handle_command(Command::Play);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(backend.outputs_opened(), 0);
    }

    #[test]
    fn test_play_twice_keeps_one_output() {
        // ~1s take so the first output cannot end on its own mid-test
        let backend = Arc::new(ScriptedBackend::new(1, tone_script(44)));
        let (mut session, mut rx, _view) = session(backend.clone());
        record_take(&mut session, &mut rx, 44);

        session.handle_command(Command::Play);
        session.handle_command(Command::Play);
        assert_eq!(session.state(), SessionState::Playing);
        assert_eq!(backend.outputs_opened(), 2);
        assert_eq!(backend.outputs_active(), 1);

        // A finish from the superseded playback changes nothing
        session.handle_event(SessionEvent::PlaybackFinished { generation: 1 });
        assert_eq!(session.state(), SessionState::Playing);

        session.handle_command(Command::Stop);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(backend.outputs_active(), 0);
    }

    #[test]
    fn test_playback_runs_to_end() {
        let backend = Arc::new(ScriptedBackend::new(1, tone_script(3)));
        let (mut session, mut rx, view) = session(backend);
        record_take(&mut session, &mut rx, 3);

        session.handle_command(Command::Play);
        assert_eq!(session.state(), SessionState::Playing);
        let controls = view.last_controls().unwrap();
        assert!(controls.stop && controls.play && !controls.record);

        pump_until(&mut session, &mut rx, |event| {
            matches!(event, SessionEvent::PlaybackFinished { .. })
        });
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.take().is_some());
    }

    #[test]
    fn test_stale_playback_chunks_skip_new_recording() {
        let backend = Arc::new(ScriptedBackend::new(1, tone_script(44)));
        let (mut session, mut rx, _view) = session(backend);
        record_take(&mut session, &mut rx, 44);

        session.handle_command(Command::Play);
        let generation = match session.waveform_source {
            Some(ChunkSource::Playback(generation)) => generation,
            other => panic!("unexpected source {:?}", other),
        };
        session.handle_command(Command::Stop);
        session.handle_command(Command::Record);
        assert_eq!(session.state(), SessionState::Recording);
        let take_id = match session.waveform_source {
            Some(ChunkSource::Capture(id)) => id,
            other => panic!("unexpected source {:?}", other),
        };

        let before = session.waveform().to_vec();
        // Queued by the playback driver before it was stopped
        session.handle_event(SessionEvent::Chunk {
            source: ChunkSource::Playback(generation),
            samples: vec![0.9; 256],
        });
        session.handle_event(SessionEvent::Chunk {
            source: ChunkSource::Capture(take_id - 1),
            samples: vec![0.9; 256],
        });
        assert_eq!(session.waveform(), before.as_slice());

        session.handle_event(SessionEvent::Chunk {
            source: ChunkSource::Capture(take_id),
            samples: vec![0.25; 256],
        });
        assert!(session.waveform()[WAVEFORM_CAPACITY - 256..]
            .iter()
            .all(|&s| s == 0.25));
        session.shutdown();
    }

    #[test]
    fn test_record_is_rejected_while_processing() {
        let backend = Arc::new(ScriptedBackend::new(1, tone_script(2)));
        let (mut session, mut rx, view) = session(backend.clone());

        session.handle_command(Command::Record);
        pump_chunks(&mut session, &mut rx, 2);
        session.handle_command(Command::Stop);
        assert!(session.is_processing());

        session.handle_command(Command::Record);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(backend.inputs_opened(), 1);
        assert!(view.notices().contains(&Notice::ProcessingBusy));

        pump_processed(&mut session, &mut rx);
        session.handle_command(Command::Record);
        assert_eq!(session.state(), SessionState::Recording);
        assert!(session.take().is_none());
        session.shutdown();
    }

    #[test]
    fn test_save_failure_keeps_take() {
        let backend = Arc::new(ScriptedBackend::new(1, tone_script(2)));
        let (mut session, mut rx, view) = session(backend);
        let dir = tempfile::tempdir().unwrap();
        record_take(&mut session, &mut rx, 2);

        // A directory cannot be written as a file
        session.handle_command(Command::Save(Some(dir.path().to_path_buf())));
        assert!(matches!(
            view.notices().last(),
            Some(Notice::SaveFailed { .. })
        ));
        assert!(session.take().is_some());

        let target = dir.path().join("retry.wav");
        session.handle_command(Command::Save(Some(target.clone())));
        assert_eq!(view.notices().last(), Some(&Notice::Saved(target.clone())));
        assert!(target.exists());
    }

    #[test]
    fn test_silent_take_cannot_be_played_or_saved() {
        let backend = Arc::new(ScriptedBackend::new(1, vec![vec![0.0; 4096]]));
        let (mut session, mut rx, view) = session(backend.clone());
        let dir = tempfile::tempdir().unwrap();
        record_take(&mut session, &mut rx, 1);

        assert!(session.take().unwrap().is_empty());
        assert!(view.notices().contains(&Notice::SilenceExhaustedTake));
        assert!(!view.last_controls().unwrap().play);

        session.handle_command(Command::Play);
        assert_eq!(backend.outputs_opened(), 0);

        let target = dir.path().join("silence.wav");
        session.handle_command(Command::Save(Some(target.clone())));
        assert!(!target.exists());
    }

    #[test]
    fn test_keep_and_discard() {
        let backend = Arc::new(ScriptedBackend::new(1, tone_script(2)));
        let (mut session, mut rx, view) = session(backend);
        record_take(&mut session, &mut rx, 2);

        session.handle_command(Command::Save(None));
        assert_eq!(view.notices().last(), Some(&Notice::KeptInMemory));
        assert!(session.take().is_some());

        session.handle_command(Command::Discard);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.take().is_none());
        assert!(!view.last_controls().unwrap().play);
    }

    #[test]
    fn test_auto_save_writes_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("auto.wav");
        let index_path = dir.path().join("recordings.json");
        let config = SessionConfig {
            auto_save: Some(target.clone()),
            index: Some(RecordingsIndex::at(&index_path)),
            ..SessionConfig::default()
        };
        let backend = Arc::new(ScriptedBackend::new(1, tone_script(2)));
        let (mut session, mut rx, view) = session_with(backend, config);
        record_take(&mut session, &mut rx, 2);

        assert!(target.exists());
        assert_eq!(view.notices().last(), Some(&Notice::Saved(target.clone())));
        let entries = RecordingsIndex::at(&index_path).load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, target);
        assert_eq!(entries[0].sample_count, session.take().unwrap().len());
    }

    #[test]
    fn test_shutdown_releases_devices() {
        let backend = Arc::new(
            ScriptedBackend::new(1, tone_script(10)).with_interval(Duration::from_millis(5)),
        );
        let (mut session, mut rx, _view) = session(backend);
        session.handle_command(Command::Record);
        pump_chunks(&mut session, &mut rx, 1);
        session.handle_command(Command::Quit);
        assert!(!session.capture.is_running());
    }
}
