//! Opened audio contexts.

use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// An audio device opened at a fixed sample rate.
pub trait DeviceContext: Send {
    fn sample_rate(&self) -> u32;

    /// Release the device. Calling it twice is a no-op.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Capture-side context: fixes the rate every microphone block is converted to.
#[derive(Debug, Clone)]
pub struct CaptureContext {
    sample_rate: u32,
    closed: Arc<AtomicBool>,
}

impl CaptureContext {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with clones, for observing the close from elsewhere.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl DeviceContext for CaptureContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(sample_rate = self.sample_rate, "capture context closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
