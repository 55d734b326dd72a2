//! Voice Activity Detection (VAD) module.
//!
//! Classifies fixed-size capture frames as speech or silence using an RMS
//! threshold and a frame-counting hysteresis, so short pauses inside a
//! sentence never end the speaking state.

use crate::defaults;

/// Configuration for the frame analyzer.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Consecutive quiet frames before speech is considered ended.
    pub silence_frames_required: u32,
    /// Emit a debug log line every this many frames. Zero disables it.
    pub log_interval: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            silence_frames_required: silence_frames_for(
                defaults::SILENCE_MS,
                defaults::CAPTURE_SAMPLE_RATE,
                defaults::BLOCK_SIZE,
            ),
            log_interval: defaults::VAD_LOG_INTERVAL,
        }
    }
}

/// Number of whole frames that cover `silence_ms` of audio, never less than one.
///
/// At 16kHz with 4096-sample blocks, 1000ms needs 4 frames (1024ms).
pub fn silence_frames_for(silence_ms: u64, sample_rate: u32, block_size: usize) -> u32 {
    let samples = silence_ms.saturating_mul(u64::from(sample_rate));
    let per_frame = 1000 * block_size.max(1) as u64;
    let frames = samples.div_ceil(per_frame).max(1);
    u32::try_from(frames).unwrap_or(u32::MAX)
}

/// Whether the speaker is currently talking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    Silent,
    Speaking,
}

/// Edge emitted when the speech state flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechTransition {
    SpeechStarted,
    SpeechEnded,
}

/// Result of classifying a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// State after this frame.
    pub is_speaking: bool,
    /// Set only on the frame that flips the state.
    pub transition: Option<SpeechTransition>,
    /// RMS level of this frame (0.0 to 1.0).
    pub level: f32,
}

/// Per-frame speech classifier with silence hysteresis.
#[derive(Debug)]
pub struct FrameAnalyzer {
    config: VadConfig,
    state: SpeechState,
    consecutive_silent_frames: u32,
    frame_count: u64,
}

impl FrameAnalyzer {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: SpeechState::Silent,
            consecutive_silent_frames: 0,
            frame_count: 0,
        }
    }

    /// Classifies one frame and advances the hysteresis.
    ///
    /// Loud frames reset the silence counter. Quiet frames increment it, and
    /// `SpeechEnded` fires exactly once when the counter reaches
    /// `silence_frames_required` while speaking.
    pub fn classify(&mut self, samples: &[i16]) -> Classification {
        let level = calculate_rms(samples);
        self.frame_count += 1;

        let transition = if level > self.config.speech_threshold {
            self.consecutive_silent_frames = 0;
            if self.state == SpeechState::Silent {
                self.state = SpeechState::Speaking;
                Some(SpeechTransition::SpeechStarted)
            } else {
                None
            }
        } else {
            self.consecutive_silent_frames = self.consecutive_silent_frames.saturating_add(1);
            if self.state == SpeechState::Speaking
                && self.consecutive_silent_frames >= self.config.silence_frames_required
            {
                self.state = SpeechState::Silent;
                Some(SpeechTransition::SpeechEnded)
            } else {
                None
            }
        };

        if self.config.log_interval > 0 && self.frame_count.is_multiple_of(self.config.log_interval) {
            tracing::debug!(
                frame = self.frame_count,
                rms = level,
                speaking = self.is_speaking(),
                silent_frames = self.consecutive_silent_frames,
                "vad"
            );
        }

        Classification {
            is_speaking: self.is_speaking(),
            transition,
            level,
        }
    }

    pub fn state(&self) -> SpeechState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.state == SpeechState::Speaking
    }

    pub fn consecutive_silent_frames(&self) -> u32 {
        self.consecutive_silent_frames
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Back to silent with all counters cleared.
    pub fn reset(&mut self) {
        self.state = SpeechState::Silent;
        self.consecutive_silent_frames = 0;
        self.frame_count = 0;
    }
}

impl Default for FrameAnalyzer {
    fn default() -> Self {
        Self::new(VadConfig::default())
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// Samples are normalized by 32768 so the result lies in 0.0 to 1.0:
/// - 0.0 represents silence
/// - ~0.707 represents a full-scale sine wave
/// - 1.0 represents `i16::MIN` held constant
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / 32768.0;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
