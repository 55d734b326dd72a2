//! Scheduled playback devices.
//!
//! A playback device exposes a monotonic clock in seconds and accepts buffers
//! to start at an absolute time on that clock. Natural completion of a source
//! is reported on the completion channel handed to the device at creation;
//! stopped sources are never reported.

use crate::audio::device::DeviceContext;
use crate::error::{GreenlightError, Result};
use crate::pipeline::types::PcmBuffer;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Identifies one scheduled buffer on a playback device.
pub type SourceId = u64;

pub type CompletionSender = mpsc::UnboundedSender<SourceId>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<SourceId>;

/// Output context with a sample-accurate scheduling clock.
pub trait PlaybackDevice: DeviceContext {
    /// Device clock in seconds.
    fn current_time(&self) -> f64;

    /// Start `buffer` at `start_at` seconds on the device clock.
    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId>;

    /// Silence one source. Unknown or finished ids are ignored.
    fn stop_source(&mut self, id: SourceId);
}

/// What the mock recorded for one `schedule` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRecord {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
    pub stopped: bool,
    pub completed: bool,
}

#[derive(Debug)]
struct MockPlaybackState {
    now: f64,
    next_id: SourceId,
    sources: Vec<ScheduledRecord>,
    closed: bool,
    fail_schedule: bool,
    completions: Option<CompletionSender>,
}

/// Mock playback device with a manually advanced clock
#[derive(Debug)]
pub struct MockPlaybackDevice {
    sample_rate: u32,
    state: Arc<Mutex<MockPlaybackState>>,
}

impl MockPlaybackDevice {
    pub fn new(sample_rate: u32, completions: CompletionSender) -> Self {
        Self {
            sample_rate,
            state: Arc::new(Mutex::new(MockPlaybackState {
                now: 0.0,
                next_id: 1,
                sources: Vec::new(),
                closed: false,
                fail_schedule: false,
                completions: Some(completions),
            })),
        }
    }

    /// Start the device clock at `seconds` instead of zero
    pub fn with_start_time(self, seconds: f64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.now = seconds;
        }
        self
    }

    /// Configure the mock to reject every `schedule` call
    pub fn with_schedule_failure(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.fail_schedule = true;
        }
        self
    }

    /// Test-side handle onto this device
    pub fn handle(&self) -> MockSpeaker {
        MockSpeaker {
            state: Arc::clone(&self.state),
        }
    }
}

impl DeviceContext for MockPlaybackDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) -> Result<()> {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.completions = None;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }
}

impl PlaybackDevice for MockPlaybackDevice {
    fn current_time(&self) -> f64 {
        self.state.lock().map(|s| s.now).unwrap_or(0.0)
    }

    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| GreenlightError::AudioPlayback {
                message: format!("Failed to lock mock device: {}", e),
            })?;
        if state.closed {
            return Err(GreenlightError::AudioPlayback {
                message: "device is closed".to_string(),
            });
        }
        if state.fail_schedule {
            return Err(GreenlightError::AudioPlayback {
                message: "mock schedule failure".to_string(),
            });
        }
        let id = state.next_id;
        state.next_id += 1;
        state.sources.push(ScheduledRecord {
            id,
            start_at,
            duration: buffer.duration_secs(),
            stopped: false,
            completed: false,
        });
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId) {
        if let Ok(mut state) = self.state.lock()
            && let Some(source) = state.sources.iter_mut().find(|s| s.id == id)
            && !source.completed
        {
            source.stopped = true;
        }
    }
}

/// Test-side view of a [`MockPlaybackDevice`].
#[derive(Debug, Clone)]
pub struct MockSpeaker {
    state: Arc<Mutex<MockPlaybackState>>,
}

impl MockSpeaker {
    /// Move the clock forward and report every source that finished playing.
    pub fn advance(&self, seconds: f64) -> Vec<SourceId> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        state.now += seconds;
        let now = state.now;

        let mut finished = Vec::new();
        for source in state.sources.iter_mut() {
            if !source.stopped && !source.completed && source.start_at + source.duration <= now + 1e-9
            {
                source.completed = true;
                finished.push(source.id);
            }
        }
        if let Some(completions) = state.completions.as_ref() {
            for id in &finished {
                let _ = completions.send(*id);
            }
        }
        finished
    }

    pub fn now(&self) -> f64 {
        self.state.lock().map(|s| s.now).unwrap_or(0.0)
    }

    pub fn scheduled(&self) -> Vec<ScheduledRecord> {
        self.state
            .lock()
            .map(|s| s.sources.clone())
            .unwrap_or_default()
    }

    /// Sources scheduled and neither finished nor stopped.
    pub fn playing(&self) -> usize {
        self.state
            .lock()
            .map(|s| {
                s.sources
                    .iter()
                    .filter(|r| !r.stopped && !r.completed)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }
}
