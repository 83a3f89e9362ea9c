//! Terminal front-end for the sound recorder
//!
//! Reads commands from stdin and drives the session on a tokio runtime.
//! The session loop is the only place that touches session state.

use crate::audio::{AudioBackend, WavRecorder};
use crate::session::{
    format_elapsed, Command, ControlState, EventReceiver, Notice, Session, SessionConfig,
    SessionState, View,
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

const HELP: &str = "Commands: record (r), pause (p), stop (s), play, \
save [path], keep, discard, help, quit (q)";

/// Level meter refresh limit while chunks stream in
const METER_INTERVAL: Duration = Duration::from_millis(100);
const METER_WIDTH: usize = 40;
/// Samples at the tail of the waveform the meter looks at
const METER_WINDOW: usize = 1024;

/// Parse one line of user input
///
/// `save` with no path writes to a generated name in the recordings directory.
pub fn parse_command(line: &str, recorder: &WavRecorder) -> Option<Command> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "record" | "r" => Some(Command::Record),
        "pause" | "resume" | "p" => Some(Command::Pause),
        "stop" | "s" => Some(Command::Stop),
        "play" => Some(Command::Play),
        "save" if rest.is_empty() => Some(Command::Save(Some(recorder.generate_filename()))),
        "save" => Some(Command::Save(Some(rest.into()))),
        "keep" => Some(Command::Save(None)),
        "discard" => Some(Command::Discard),
        "quit" | "exit" | "q" => Some(Command::Quit),
        _ => None,
    }
}

/// Root-mean-square level of the newest samples, in [0, 1]
fn level(samples: &[f32]) -> f32 {
    let tail = &samples[samples.len().saturating_sub(METER_WINDOW)..];
    if tail.is_empty() {
        return 0.0;
    }
    let sum: f32 = tail.iter().map(|s| s * s).sum();
    (sum / tail.len() as f32).sqrt().min(1.0)
}

fn meter(level: f32) -> String {
    let filled = (level * METER_WIDTH as f32).round() as usize;
    format!(
        "[{}{}]",
        "#".repeat(filled.min(METER_WIDTH)),
        " ".repeat(METER_WIDTH - filled.min(METER_WIDTH))
    )
}

fn describe_controls(controls: &ControlState) -> String {
    let mut enabled = Vec::new();
    if controls.record {
        enabled.push("record");
    }
    if controls.pause {
        enabled.push(if controls.pause_label == "Resume" {
            "resume"
        } else {
            "pause"
        });
    }
    if controls.stop {
        enabled.push("stop");
    }
    if controls.play {
        enabled.push("play");
    }
    enabled.join(" | ")
}

/// Renders session output as plain terminal lines
pub struct TerminalView {
    elapsed: String,
    last_meter: Option<Instant>,
    controls: Option<ControlState>,
}

impl TerminalView {
    pub fn new() -> Self {
        Self {
            elapsed: format_elapsed(0),
            last_meter: None,
            controls: None,
        }
    }

    fn line(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        // Clear any meter line in progress
        let _ = writeln!(out, "\r\x1b[2K{}", text);
        let _ = out.flush();
    }
}

impl Default for TerminalView {
    fn default() -> Self {
        Self::new()
    }
}

impl View for TerminalView {
    fn waveform(&mut self, samples: &[f32]) {
        let now = Instant::now();
        if self
            .last_meter
            .is_some_and(|last| now.duration_since(last) < METER_INTERVAL)
        {
            return;
        }
        self.last_meter = Some(now);

        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\r{} {}", self.elapsed, meter(level(samples)));
        let _ = out.flush();
    }

    fn elapsed(&mut self, text: &str) {
        self.elapsed = text.to_string();
    }

    fn controls(&mut self, controls: ControlState) {
        if self.controls == Some(controls) {
            return;
        }
        self.controls = Some(controls);
        self.line(&format!("Available: {}", describe_controls(&controls)));
    }

    fn notice(&mut self, notice: Notice) {
        let text = match notice {
            Notice::RecordingStarted => "Recording...".to_string(),
            Notice::DeviceUnavailable(e) => format!("Error: {}", e),
            Notice::EmptyTake => "Nothing was recorded".to_string(),
            Notice::ProcessingBusy => "Still processing the previous take".to_string(),
            Notice::Processing => "Processing take...".to_string(),
            Notice::SilenceExhaustedTake => {
                "Take contained only silence; nothing to play or save".to_string()
            }
            Notice::TakeReady {
                samples,
                duration_seconds,
            } => format!(
                "Take ready: {:.1}s ({} samples). Type 'save [path]', 'keep' or 'discard'",
                duration_seconds, samples
            ),
            Notice::Saved(path) => format!("Saved to {}", path.display()),
            Notice::SaveFailed { path, error } => {
                format!("Could not save {}: {}", path.display(), error)
            }
            Notice::KeptInMemory => "Take kept in memory".to_string(),
            Notice::Discarded => "Take discarded".to_string(),
        };
        self.line(&text);
    }
}

/// Build the runtime and run the session until the user quits or stdin closes
pub fn run(config: SessionConfig, backend: Arc<dyn AudioBackend>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let recorder = config.recorder.clone();
    let (mut session, events) = Session::new(config, backend, Box::new(TerminalView::new()))
        .context("Invalid processing parameters")?;

    println!("{}", HELP);
    session.render();

    // The session loop is polled on this thread, not a runtime worker, so the
    // blocking device and file calls it makes never stall the stdin reader
    runtime.block_on(async move {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        tokio::spawn(read_commands(recorder, commands_tx));
        drive(session, events, commands).await;
    });

    // The stdin reader may still be parked on a read
    runtime.shutdown_timeout(Duration::from_millis(100));
    Ok(())
}

async fn read_commands(recorder: WavRecorder, commands: mpsc::UnboundedSender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read command: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line, &recorder) {
            Some(command) => {
                if commands.send(command).is_err() {
                    break;
                }
            }
            None => println!("{}", HELP),
        }
    }
}

async fn drive(
    mut session: Session,
    mut events: EventReceiver,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Producer events first, so anything queued before a command is seen before it
            biased;
            Some(event) = events.recv() => session.handle_event(event),
            command = commands.recv() => {
                let Some(command) = command else {
                    info!("Input closed, shutting down");
                    break;
                };
                if command == Command::Quit {
                    break;
                }
                let was_recording = session.state() == SessionState::Recording;
                session.handle_command(command);
                if !was_recording && session.state() == SessionState::Recording {
                    // Count whole seconds from the moment recording starts
                    ticker.reset();
                }
            }
            _ = ticker.tick() => session.tick_second(),
        }
    }

    session.shutdown();
    info!("Session closed");
}
