//! Audio device acquisition for one pipeline run.

use crate::audio::device::{CaptureContext, DeviceContext};
use crate::audio::playback::{CompletionSender, MockPlaybackDevice, MockSpeaker, PlaybackDevice};
use crate::audio::recorder::{AudioSource, MockAudioSource, MockMicrophone, ReleaseGate};
use crate::error::{GreenlightError, Result};
use crate::pipeline::capture_station::{CaptureConfig, CaptureStation};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Opens the devices a session needs, in the order the coordinator asks for them.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Open the microphone. Fails with `MicrophoneAccess` when denied or absent.
    async fn acquire_microphone(&self) -> Result<Box<dyn AudioSource>>;

    async fn create_input_context(&self, sample_rate: u32) -> Result<Box<dyn DeviceContext>>;

    /// Open the output device. Natural completions are reported on `completions`.
    async fn create_output_context(
        &self,
        sample_rate: u32,
        completions: CompletionSender,
    ) -> Result<Box<dyn PlaybackDevice>>;

    /// Prepare the per-frame processor that frames and classifies capture blocks.
    async fn load_frame_processor(&self, config: CaptureConfig) -> Result<CaptureStation> {
        Ok(CaptureStation::new(config))
    }
}

#[cfg(feature = "cpal-audio")]
pub use self::cpal_backend::CpalBackend;

#[cfg(feature = "cpal-audio")]
mod cpal_backend {
    use super::*;
    use crate::audio::capture::CpalAudioSource;
    use crate::audio::speaker::CpalPlaybackDevice;
    use crate::audio::wav::WavAudioSource;
    use crate::defaults;
    use std::path::PathBuf;

    /// Host audio through CPAL, optionally replaying a WAV file as the microphone.
    #[derive(Debug, Clone, Default)]
    pub struct CpalBackend {
        input_device: Option<String>,
        output_device: Option<String>,
        input_wav: Option<PathBuf>,
    }

    impl CpalBackend {
        pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
            Self {
                input_device,
                output_device,
                input_wav: None,
            }
        }

        pub fn with_input_wav(mut self, path: PathBuf) -> Self {
            self.input_wav = Some(path);
            self
        }
    }

    fn join_error(e: tokio::task::JoinError) -> GreenlightError {
        GreenlightError::Other(format!("device task failed: {}", e))
    }

    #[async_trait]
    impl AudioBackend for CpalBackend {
        async fn acquire_microphone(&self) -> Result<Box<dyn AudioSource>> {
            if let Some(path) = self.input_wav.clone() {
                let source = WavAudioSource::open(&path)?;
                tracing::info!(path = %path.display(), seconds = source.duration_secs(), "replaying WAV as microphone");
                return Ok(Box::new(source));
            }
            let device = self.input_device.clone();
            let source = tokio::task::spawn_blocking(move || {
                CpalAudioSource::open(device.as_deref(), defaults::CAPTURE_SAMPLE_RATE)
            })
            .await
            .map_err(join_error)??;
            Ok(Box::new(source))
        }

        async fn create_input_context(&self, sample_rate: u32) -> Result<Box<dyn DeviceContext>> {
            Ok(Box::new(CaptureContext::new(sample_rate)))
        }

        async fn create_output_context(
            &self,
            sample_rate: u32,
            completions: CompletionSender,
        ) -> Result<Box<dyn PlaybackDevice>> {
            let device = self.output_device.clone();
            let playback = tokio::task::spawn_blocking(move || {
                CpalPlaybackDevice::open(device.as_deref(), sample_rate, completions)
            })
            .await
            .map_err(join_error)??;
            Ok(Box::new(playback))
        }
    }
}

#[derive(Debug, Default)]
struct MockBackendState {
    microphones: Vec<MockMicrophone>,
    input_contexts: Vec<Arc<AtomicBool>>,
    speakers: Vec<MockSpeaker>,
    processors_loaded: usize,
}

/// Mock backend for testing
///
/// Every acquisition creates fresh mock devices; [`MockDevices`] lets the test
/// reach the latest ones and audit what is still held.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockBackendState>>,
    fail_microphone: bool,
    fail_microphone_start: bool,
    fail_input_context: bool,
    fail_output_context: bool,
    fail_frame_processor: bool,
    playback_start_time: f64,
    microphone_release_gate: Option<ReleaseGate>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Microphone permission is denied
    pub fn with_microphone_failure(mut self) -> Self {
        self.fail_microphone = true;
        self
    }

    /// Microphones fail when the capture graph is wired
    pub fn with_microphone_start_failure(mut self) -> Self {
        self.fail_microphone_start = true;
        self
    }

    pub fn with_input_context_failure(mut self) -> Self {
        self.fail_input_context = true;
        self
    }

    pub fn with_output_context_failure(mut self) -> Self {
        self.fail_output_context = true;
        self
    }

    /// The frame processor module fails to load
    pub fn with_frame_processor_failure(mut self) -> Self {
        self.fail_frame_processor = true;
        self
    }

    /// Microphones block in `stop` until `gate` is opened
    pub fn with_microphone_release_gate(mut self, gate: ReleaseGate) -> Self {
        self.microphone_release_gate = Some(gate);
        self
    }

    /// Playback clocks start at `seconds`
    pub fn with_playback_start_time(mut self, seconds: f64) -> Self {
        self.playback_start_time = seconds;
        self
    }

    pub fn devices(&self) -> MockDevices {
        MockDevices {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl AudioBackend for MockBackend {
    async fn acquire_microphone(&self) -> Result<Box<dyn AudioSource>> {
        if self.fail_microphone {
            return Err(GreenlightError::MicrophoneAccess {
                message: "permission denied".to_string(),
            });
        }
        let mut source = MockAudioSource::new();
        if self.fail_microphone_start {
            source = source.with_start_failure();
        }
        if let Some(gate) = &self.microphone_release_gate {
            source = source.with_release_gate(gate.clone());
        }
        if let Ok(mut state) = self.state.lock() {
            state.microphones.push(source.handle());
        }
        Ok(Box::new(source))
    }

    async fn create_input_context(&self, sample_rate: u32) -> Result<Box<dyn DeviceContext>> {
        if self.fail_input_context {
            return Err(GreenlightError::AudioCapture {
                message: "input context unavailable".to_string(),
            });
        }
        let context = CaptureContext::new(sample_rate);
        if let Ok(mut state) = self.state.lock() {
            state.input_contexts.push(context.closed_flag());
        }
        Ok(Box::new(context))
    }

    async fn create_output_context(
        &self,
        sample_rate: u32,
        completions: CompletionSender,
    ) -> Result<Box<dyn PlaybackDevice>> {
        if self.fail_output_context {
            return Err(GreenlightError::AudioPlayback {
                message: "output context unavailable".to_string(),
            });
        }
        let device = MockPlaybackDevice::new(sample_rate, completions)
            .with_start_time(self.playback_start_time);
        if let Ok(mut state) = self.state.lock() {
            state.speakers.push(device.handle());
        }
        Ok(Box::new(device))
    }

    async fn load_frame_processor(&self, config: CaptureConfig) -> Result<CaptureStation> {
        if self.fail_frame_processor {
            return Err(GreenlightError::FrameProcessorLoad {
                message: "module not found".to_string(),
            });
        }
        if let Ok(mut state) = self.state.lock() {
            state.processors_loaded += 1;
        }
        Ok(CaptureStation::new(config))
    }
}

/// Test-side view of everything a [`MockBackend`] handed out.
#[derive(Debug, Clone)]
pub struct MockDevices {
    state: Arc<Mutex<MockBackendState>>,
}

impl MockDevices {
    /// Most recently acquired microphone
    pub fn microphone(&self) -> Option<MockMicrophone> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.microphones.last().cloned())
    }

    /// Most recently opened playback device
    pub fn speaker(&self) -> Option<MockSpeaker> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.speakers.last().cloned())
    }

    pub fn microphones_acquired(&self) -> usize {
        self.state.lock().map(|s| s.microphones.len()).unwrap_or(0)
    }

    pub fn processors_loaded(&self) -> usize {
        self.state.lock().map(|s| s.processors_loaded).unwrap_or(0)
    }

    /// Devices acquired and not yet released: microphones, capture and playback contexts.
    pub fn held_resources(&self) -> usize {
        let Ok(state) = self.state.lock() else {
            return 0;
        };
        let microphones = state
            .microphones
            .iter()
            .filter(|m| !m.is_released())
            .count();
        let inputs = state
            .input_contexts
            .iter()
            .filter(|closed| !closed.load(Ordering::SeqCst))
            .count();
        let outputs = state.speakers.iter().filter(|s| !s.is_closed()).count();
        microphones + inputs + outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_mock_backend_tracks_held_resources() {
        let backend = MockBackend::new();
        let devices = backend.devices();

        let mut mic = backend.acquire_microphone().await.unwrap();
        let mut input = backend.create_input_context(16000).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut output = backend.create_output_context(24000, tx).await.unwrap();
        assert_eq!(devices.held_resources(), 3);

        mic.stop().unwrap();
        input.close().unwrap();
        output.close().unwrap();
        assert_eq!(devices.held_resources(), 0);
    }

    #[tokio::test]
    async fn test_mock_backend_failures() {
        let backend = MockBackend::new()
            .with_microphone_failure()
            .with_frame_processor_failure();

        assert!(matches!(
            backend.acquire_microphone().await,
            Err(GreenlightError::MicrophoneAccess { .. })
        ));
        assert!(matches!(
            backend.load_frame_processor(CaptureConfig::default()).await,
            Err(GreenlightError::FrameProcessorLoad { .. })
        ));
        assert_eq!(backend.devices().microphones_acquired(), 0);
    }

    #[tokio::test]
    async fn test_playback_start_time_applies_to_new_devices() {
        let backend = MockBackend::new().with_playback_start_time(3.0);
        let (tx, _rx) = mpsc::unbounded_channel();
        let output = backend.create_output_context(24000, tx).await.unwrap();
        assert_eq!(output.current_time(), 3.0);
        assert_eq!(output.sample_rate(), 24000);
    }
}
