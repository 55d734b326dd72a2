use crate::error::{GreenlightError, Result};
use std::sync::{Arc, Condvar, Mutex};
use tokio::sync::mpsc;

/// What a microphone pushes into the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// One device callback worth of mono samples at the requested rate. Any length.
    Samples(Vec<i16>),
    /// The device stream stopped on its own.
    Ended { reason: String },
}

pub type CaptureSender = mpsc::UnboundedSender<CaptureEvent>;
pub type CaptureReceiver = mpsc::UnboundedReceiver<CaptureEvent>;

/// Trait for acquired microphone devices.
///
/// Acquiring a source opens the device. Audio only flows once `start` wires it
/// into a sink, and stops flowing the moment `disconnect` returns.
pub trait AudioSource: Send {
    /// Wire the device into `sink`, delivering mono samples at `sample_rate`.
    ///
    /// # Returns
    /// Ok(()) if the capture graph is connected, or an error
    fn start(&mut self, sample_rate: u32, sink: CaptureSender) -> Result<()>;

    /// Detach the sink. No samples are delivered after this returns.
    fn disconnect(&mut self);

    /// Stop the device and release it.
    ///
    /// # Returns
    /// Ok(()) if the device was released, or an error
    fn stop(&mut self) -> Result<()>;

    /// Human readable device name for logs.
    fn name(&self) -> String {
        "microphone".to_string()
    }
}

/// Shared slot a device callback forwards into. `None` means disconnected.
#[derive(Debug, Clone, Default)]
pub struct SinkSlot {
    inner: Arc<Mutex<Option<CaptureSender>>>,
}

impl SinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, sink: CaptureSender) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = Some(sink);
        }
    }

    pub fn disconnect(&self) {
        if let Ok(mut slot) = self.inner.lock() {
            *slot = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Forward one event. Returns false when nothing is connected.
    pub fn push(&self, event: CaptureEvent) -> bool {
        match self.inner.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(sink) => sink.send(event).is_ok(),
                None => false,
            },
            Err(_) => false,
        }
    }
}

/// Blocks a mock device's release until the test opens it.
#[derive(Debug, Clone, Default)]
pub struct ReleaseGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ReleaseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (open, cvar) = &*self.inner;
        if let Ok(mut open) = open.lock() {
            *open = true;
        }
        cvar.notify_all();
    }

    fn wait(&self) {
        let (open, cvar) = &*self.inner;
        let Ok(mut guard) = open.lock() else {
            return;
        };
        while !*guard {
            guard = match cvar.wait(guard) {
                Ok(guard) => guard,
                Err(_) => return,
            };
        }
    }
}

#[derive(Debug, Default)]
struct MockMicState {
    started: bool,
    released: bool,
    sample_rate: Option<u32>,
}

/// Mock microphone for testing
///
/// Clone the [`MockMicrophone`] handle before boxing the source to push
/// samples from the test once the capture graph is wired.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    slot: SinkSlot,
    state: Arc<Mutex<MockMicState>>,
    initial_samples: Vec<i16>,
    should_fail_start: bool,
    should_fail_stop: bool,
    release_gate: Option<ReleaseGate>,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock microphone with default settings
    pub fn new() -> Self {
        Self {
            slot: SinkSlot::new(),
            state: Arc::new(Mutex::new(MockMicState::default())),
            initial_samples: Vec::new(),
            should_fail_start: false,
            should_fail_stop: false,
            release_gate: None,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Samples pushed as a single callback as soon as the graph is wired
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.initial_samples = samples;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Block `stop` until `gate` is opened, like a device joining its worker
    pub fn with_release_gate(mut self, gate: ReleaseGate) -> Self {
        self.release_gate = Some(gate);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Test-side handle onto this microphone
    pub fn handle(&self) -> MockMicrophone {
        MockMicrophone {
            slot: self.slot.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self, sample_rate: u32, sink: CaptureSender) -> Result<()> {
        if self.should_fail_start {
            return Err(GreenlightError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.slot.connect(sink);
        if let Ok(mut state) = self.state.lock() {
            state.started = true;
            state.sample_rate = Some(sample_rate);
        }
        if !self.initial_samples.is_empty() {
            self.slot
                .push(CaptureEvent::Samples(self.initial_samples.clone()));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.slot.disconnect();
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(gate) = &self.release_gate {
            gate.wait();
        }
        if self.should_fail_stop {
            return Err(GreenlightError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        self.slot.disconnect();
        if let Ok(mut state) = self.state.lock() {
            state.started = false;
            state.released = true;
        }
        Ok(())
    }

    fn name(&self) -> String {
        "mock microphone".to_string()
    }
}

/// Test-side view of a [`MockAudioSource`].
#[derive(Debug, Clone)]
pub struct MockMicrophone {
    slot: SinkSlot,
    state: Arc<Mutex<MockMicState>>,
}

impl MockMicrophone {
    /// Deliver one callback of samples. Returns false if the graph is not wired.
    pub fn push(&self, samples: Vec<i16>) -> bool {
        self.slot.push(CaptureEvent::Samples(samples))
    }

    /// Simulate the device going away.
    pub fn end(&self, reason: &str) -> bool {
        self.slot.push(CaptureEvent::Ended {
            reason: reason.to_string(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.slot.is_connected()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().map(|s| s.started).unwrap_or(false)
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().map(|s| s.released).unwrap_or(false)
    }

    pub fn requested_sample_rate(&self) -> Option<u32> {
        self.state.lock().ok().and_then(|s| s.sample_rate)
    }
}
