//! PipeWire implementation of the audio backend
//!
//! Every stream runs its own PipeWire main loop on a dedicated thread. The
//! opening thread waits for the loop to report that the stream connected, so
//! connection failures surface as `DeviceUnavailable` from `open_*`.

use super::backend::{AudioBackend, AudioError, FrameHandler, StreamConfig, StreamHandle};
use log::{debug, error, info};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

const APP_NAME: &str = "Sound Recorder";

enum StreamCommand {
    Stop,
}

/// Where the stream thread reports whether connecting succeeded
type ReadySender = mpsc::Sender<Result<(), AudioError>>;

/// Backend talking to the PipeWire daemon
#[derive(Clone, Debug, Default)]
pub struct PipeWireBackend;

impl PipeWireBackend {
    pub fn new() -> Self {
        Self
    }

    fn spawn_stream<F>(&self, name: &'static str, run: F) -> Result<StreamHandle, AudioError>
    where
        F: FnOnce(pw::channel::Receiver<StreamCommand>, &ReadySender) -> Result<(), AudioError>
            + Send
            + 'static,
    {
        let (sender, receiver) = pw::channel::channel::<StreamCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Err(e) = run(receiver, &ready_tx) {
                    error!("{} stream error: {}", name, e);
                    // Only matters if we failed before reporting readiness
                    let _ = ready_tx.send(Err(e));
                }
                debug!("{} stream thread exiting", name);
            })
            .map_err(|e| AudioError::StreamFailed(format!("Failed to spawn stream thread: {}", e)))?;

        let handle = StreamHandle::new(
            move || {
                let _ = sender.send(StreamCommand::Stop);
            },
            thread,
        );

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::DeviceUnavailable(format!(
                "{} stream thread exited before connecting",
                name
            ))),
        }
    }
}

impl AudioBackend for PipeWireBackend {
    fn open_input(
        &self,
        config: StreamConfig,
        on_frames: FrameHandler,
    ) -> Result<StreamHandle, AudioError> {
        self.spawn_stream("capture", move |receiver, ready| {
            run_capture_loop(config, on_frames, receiver, ready)
        })
    }

    fn open_output(
        &self,
        config: StreamConfig,
        samples: Arc<[f32]>,
    ) -> Result<StreamHandle, AudioError> {
        self.spawn_stream("playback", move |receiver, ready| {
            run_playback_loop(config, samples, receiver, ready)
        })
    }
}

fn unavailable(what: &str, e: impl std::fmt::Display) -> AudioError {
    AudioError::DeviceUnavailable(format!("{}: {}", what, e))
}

/// Serialize an F32LE EnumFormat pod for the requested rate and channel count
fn format_params(config: StreamConfig) -> Result<Vec<u8>, AudioError> {
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(config.sample_rate);
    audio_info.set_channels(config.channels.max(1) as u32);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| AudioError::StreamFailed(format!("Failed to serialize audio format: {:?}", e)))?
    .0
    .into_inner();

    Ok(values)
}

/// Update `format` from a negotiated Format param, ignoring anything else
fn parse_format_param(
    format: &mut spa::param::audio::AudioInfoRaw,
    id: u32,
    param: Option<&Pod>,
) {
    let Some(param) = param else { return };
    if id != spa::param::ParamType::Format.as_raw() {
        return;
    }

    let (media_type, media_subtype) = match format_utils::parse_format(param) {
        Ok(v) => v,
        Err(_) => return,
    };

    if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
        return;
    }

    if let Err(e) = format.parse(param) {
        error!("Failed to parse negotiated audio format: {:?}", e);
        return;
    }
    info!(
        "Negotiated audio format: {} Hz, {} channel(s)",
        format.rate(),
        format.channels()
    );
}

fn run_capture_loop(
    config: StreamConfig,
    on_frames: FrameHandler,
    receiver: pw::channel::Receiver<StreamCommand>,
    ready: &ReadySender,
) -> Result<(), AudioError> {
    pw::init();

    let mainloop =
        pw::main_loop::MainLoopRc::new(None).map_err(|e| unavailable("PipeWire main loop", e))?;
    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| unavailable("PipeWire context", e))?;
    let core = context
        .connect_rc(None)
        .map_err(|e| unavailable("Failed to connect to PipeWire", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        StreamCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        on_frames: FrameHandler,
        scratch: Vec<f32>,
    }

    let user_data = UserData {
        format: Default::default(),
        on_frames,
        scratch: Vec::with_capacity(4096),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Production",
        *pw::keys::APP_NAME => APP_NAME,
    };

    let stream = pw::stream::StreamBox::new(&core, "sound-recorder-capture", props)
        .map_err(|e| unavailable("PipeWire capture stream", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            parse_format_param(&mut user_data.format, id, param);
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let n_samples = data.chunk().size() as usize / std::mem::size_of::<f32>();

            let Some(raw) = data.data() else {
                return;
            };

            user_data.scratch.clear();
            user_data.scratch.extend(
                raw.chunks_exact(std::mem::size_of::<f32>())
                    .take(n_samples)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );

            // Drop a trailing partial frame
            let whole = user_data.scratch.len() - user_data.scratch.len() % n_channels;
            (user_data.on_frames)(&user_data.scratch[..whole], n_channels);
        })
        .register()
        .map_err(|e| AudioError::StreamFailed(format!("Failed to register stream listener: {}", e)))?;

    let values = format_params(config)?;
    let pod = Pod::from_bytes(&values)
        .ok_or_else(|| AudioError::StreamFailed("Invalid audio format pod".into()))?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| unavailable("Failed to connect capture stream", e))?;

    let _ = ready.send(Ok(()));
    info!("Capture stream connected");

    // Run until stopped
    mainloop.run();

    info!("Capture stream closed");
    Ok(())
}

/// Result of filling one output buffer
#[derive(Debug, PartialEq, Eq)]
enum Fill {
    Frames(usize),
    /// Every sample has already been queued
    Exhausted,
}

/// Write mono samples from `position` into an interleaved F32LE buffer,
/// repeating each sample on every channel
fn fill_interleaved(samples: &[f32], position: usize, out: &mut [u8], channels: usize) -> Fill {
    let remaining = samples.len().saturating_sub(position);
    if remaining == 0 {
        return Fill::Exhausted;
    }

    let sample_size = std::mem::size_of::<f32>();
    let stride = sample_size * channels.max(1);
    let n_frames = (out.len() / stride).min(remaining);
    for (i, &sample) in samples[position..position + n_frames].iter().enumerate() {
        let bytes = sample.to_le_bytes();
        for channel in 0..channels.max(1) {
            let offset = i * stride + channel * sample_size;
            out[offset..offset + sample_size].copy_from_slice(&bytes);
        }
    }
    Fill::Frames(n_frames)
}

fn run_playback_loop(
    config: StreamConfig,
    samples: Arc<[f32]>,
    receiver: pw::channel::Receiver<StreamCommand>,
    ready: &ReadySender,
) -> Result<(), AudioError> {
    pw::init();

    let mainloop =
        pw::main_loop::MainLoopRc::new(None).map_err(|e| unavailable("PipeWire main loop", e))?;
    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| unavailable("PipeWire context", e))?;
    let core = context
        .connect_rc(None)
        .map_err(|e| unavailable("Failed to connect to PipeWire", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        StreamCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        samples: Arc<[f32]>,
        position: usize,
        /// Set once the last samples are queued and a drain was requested
        draining: bool,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    impl UserData {
        fn quit(&self) {
            if let Some(mainloop) = self.mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    }

    let user_data = UserData {
        format: Default::default(),
        samples,
        position: 0,
        draining: false,
        mainloop_weak: mainloop.downgrade(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => APP_NAME,
    };

    let stream = pw::stream::StreamBox::new(&core, "sound-recorder-playback", props)
        .map_err(|e| unavailable("PipeWire playback stream", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            parse_format_param(&mut user_data.format, id, param);
        })
        .drained(|_, user_data| {
            debug!("Playback stream drained");
            user_data.quit();
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let stride = std::mem::size_of::<f32>() * n_channels;

            let filled = match data.data() {
                Some(slice) => {
                    fill_interleaved(&user_data.samples, user_data.position, slice, n_channels)
                }
                None => return,
            };

            let chunk = data.chunk_mut();
            match filled {
                Fill::Frames(n_frames) => {
                    user_data.position += n_frames;
                    *chunk.offset_mut() = 0;
                    *chunk.stride_mut() = stride as i32;
                    *chunk.size_mut() = (n_frames * stride) as u32;
                }
                Fill::Exhausted => {
                    // Hand back an empty buffer and let the queued audio play out
                    *chunk.size_mut() = 0;
                    if !user_data.draining {
                        user_data.draining = true;
                        if let Err(e) = stream.flush(true) {
                            error!("Failed to drain playback stream: {}", e);
                            user_data.quit();
                        }
                    }
                }
            }
        })
        .register()
        .map_err(|e| AudioError::StreamFailed(format!("Failed to register stream listener: {}", e)))?;

    let values = format_params(config)?;
    let pod = Pod::from_bytes(&values)
        .ok_or_else(|| AudioError::StreamFailed("Invalid audio format pod".into()))?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| unavailable("Failed to connect playback stream", e))?;

    let _ = ready.send(Ok(()));
    info!("Playback stream connected");

    // Run until stopped or the stream has drained
    mainloop.run();

    info!("Playback stream closed");
    Ok(())
}
