//! Off-thread post-processing of completed takes
//!
//! A single-slot executor: one job at a time, new submissions are rejected
//! until the session acknowledges the result.

use crate::dsp::Pipeline;
use crate::models::Take;
use crate::session::{EventSender, SessionEvent};
use log::{info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A job is already in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingBusy {
    pub job: u64,
}

impl std::fmt::Display for ProcessingBusy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Post-processing job #{} is still running", self.job)
    }
}

impl std::error::Error for ProcessingBusy {}

struct InFlight {
    job: u64,
    worker: JoinHandle<()>,
}

pub struct PostProcessor {
    pipeline: Arc<Pipeline>,
    events: EventSender,
    next_job: u64,
    in_flight: Option<InFlight>,
}

impl PostProcessor {
    pub fn new(pipeline: Pipeline, events: EventSender) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            events,
            next_job: 1,
            in_flight: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start processing `take` on a worker thread
    ///
    /// The result arrives as [`SessionEvent::Processed`] carrying the returned job id.
    pub fn submit(&mut self, take: Take) -> Result<u64, ProcessingBusy> {
        if let Some(current) = &self.in_flight {
            return Err(ProcessingBusy { job: current.job });
        }

        let job = self.next_job;
        self.next_job += 1;

        let pipeline = self.pipeline.clone();
        let events = self.events.clone();
        let worker = thread::spawn(move || {
            let started = Instant::now();
            let input_len = take.len();
            let processed = pipeline.run(take.samples());
            info!(
                "Post-processing job #{} done in {:?}: {} -> {} samples",
                job,
                started.elapsed(),
                input_len,
                processed.len()
            );
            let take = Take::new(processed, take.sample_rate());
            let _ = events.send(SessionEvent::Processed { job, take });
        });

        self.in_flight = Some(InFlight { job, worker });
        Ok(job)
    }

    /// Acknowledge a finished job, freeing the slot
    ///
    /// Returns false if `job` is not the one in flight.
    pub fn complete(&mut self, job: u64) -> bool {
        match &self.in_flight {
            Some(current) if current.job == job => {}
            _ => return false,
        }
        if let Some(done) = self.in_flight.take() {
            if done.worker.join().is_err() {
                warn!("Post-processing worker #{} panicked", job);
            }
        }
        true
    }
}
