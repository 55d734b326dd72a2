//! Capture station: re-blocks device callbacks into fixed frames and classifies each one.

use crate::audio::vad::{Classification, FrameAnalyzer, VadConfig};
use crate::defaults;
use crate::pipeline::types::AudioFrame;

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Samples per emitted frame.
    pub block_size: usize,
    pub sample_rate: u32,
    pub vad: VadConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_size: defaults::BLOCK_SIZE,
            sample_rate: defaults::CAPTURE_SAMPLE_RATE,
            vad: VadConfig::default(),
        }
    }
}

/// A completed frame together with its speech classification.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: AudioFrame,
    pub classification: Classification,
}

/// Turns arbitrarily sized device callbacks into an ordered stream of analyzed frames.
///
/// Every completed frame is classified exactly once, in capture order.
/// Partial blocks stay buffered until the next callback fills them.
#[derive(Debug)]
pub struct CaptureStation {
    config: CaptureConfig,
    pending: Vec<i16>,
    analyzer: FrameAnalyzer,
    sequence: u64,
}

impl CaptureStation {
    pub fn new(config: CaptureConfig) -> Self {
        let block_size = config.block_size.max(1);
        Self {
            config: CaptureConfig {
                block_size,
                ..config
            },
            pending: Vec::with_capacity(block_size),
            analyzer: FrameAnalyzer::new(config.vad),
            sequence: 0,
        }
    }

    /// Feed one device callback. Returns the frames it completed, oldest first.
    pub fn push(&mut self, samples: &[i16]) -> Vec<CapturedFrame> {
        let block_size = self.config.block_size;
        let mut completed = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let take = (block_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(block_size));
                let frame = AudioFrame::new(block, self.config.sample_rate, self.sequence);
                self.sequence += 1;
                let classification = self.analyzer.classify(&frame.samples);
                completed.push(CapturedFrame {
                    frame,
                    classification,
                });
            }
        }

        completed
    }

    pub fn analyzer(&self) -> &FrameAnalyzer {
        &self.analyzer
    }

    pub fn frames_emitted(&self) -> u64 {
        self.sequence
    }

    /// Samples waiting for the current frame to fill.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.analyzer.reset();
        self.sequence = 0;
    }
}
