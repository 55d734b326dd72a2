//! Data types flowing through the voice session pipeline.

use std::sync::Arc;
use std::time::Instant;

/// A fixed-size block of captured PCM, shared read-only by analysis and upload.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples (16-bit signed integers), interleaved when `channels > 1`.
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Timestamp when this frame was completed.
    pub timestamp: Instant,
    /// Sequence number for ordering and gap detection.
    pub sequence: u64,
}

impl AudioFrame {
    /// Creates a new mono audio frame.
    pub fn new(samples: Vec<i16>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels: 1,
            timestamp: Instant::now(),
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian byte view of the samples.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Decoded mono PCM ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Builds a buffer from raw little-endian i16 bytes. A trailing odd byte is ignored.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, sample_rate)
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Buffer of silence lasting `seconds`.
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let count = (seconds * sample_rate as f64).round() as usize;
        Self::new(vec![0; count], sample_rate)
    }
}

/// Which side of the conversation a transcript belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscriptChannel {
    /// What the golfer said.
    Input,
    /// What the caddy said.
    Output,
}

impl std::fmt::Display for TranscriptChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptChannel::Input => write!(f, "input"),
            TranscriptChannel::Output => write!(f, "output"),
        }
    }
}

/// Latest transcript text per channel. Each update replaces the previous text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub input: String,
    pub output: String,
}

impl Transcript {
    pub fn apply(&mut self, channel: TranscriptChannel, text: &str) {
        match channel {
            TranscriptChannel::Input => self.input = text.to_string(),
            TranscriptChannel::Output => self.output = text.to_string(),
        }
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_creation() {
        let frame = AudioFrame::new(vec![1, -2, 3], 16000, 7);
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn test_audio_frame_le_bytes() {
        let frame = AudioFrame::new(vec![1, -2], 16000, 0);
        assert_eq!(frame.to_le_bytes(), vec![0x01, 0x00, 0xFE, 0xFF]);
    }

    #[test]
    fn test_pcm_buffer_from_le_bytes_drops_odd_byte() {
        let buffer = PcmBuffer::from_le_bytes(&[0x01, 0x00, 0xFE, 0xFF, 0x7F], 24000);
        assert_eq!(&*buffer.samples, &[1, -2]);
    }

    #[test]
    fn test_pcm_buffer_duration() {
        let buffer = PcmBuffer::silence(0.5, 24000);
        assert_eq!(buffer.samples.len(), 12000);
        assert!((buffer.duration_secs() - 0.5).abs() < 1e-9);
        assert_eq!(PcmBuffer::new(vec![0; 10], 0).duration_secs(), 0.0);
    }

    #[test]
    fn test_transcript_replaces_per_channel() {
        let mut transcript = Transcript::default();
        transcript.apply(TranscriptChannel::Input, "three paces");
        transcript.apply(TranscriptChannel::Input, "three paces breaking right");
        transcript.apply(TranscriptChannel::Output, "Aim right");

        assert_eq!(transcript.input, "three paces breaking right");
        assert_eq!(transcript.output, "Aim right");

        transcript.clear();
        assert!(transcript.is_empty());
    }
}
