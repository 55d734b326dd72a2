//! Gapless playback of inbound audio.

use crate::audio::playback::{PlaybackDevice, SourceId};
use crate::error::Result;
use crate::pipeline::types::PcmBuffer;
use std::collections::HashSet;

/// Where one enqueued buffer landed on the device clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

/// Schedules decoded buffers back-to-back against a playback device.
///
/// The cursor never moves backwards except on [`interrupt`](Self::interrupt),
/// so a buffer always starts at or after the end of the one enqueued before it.
pub struct PlaybackScheduler {
    device: Box<dyn PlaybackDevice>,
    cursor: f64,
    pending: HashSet<SourceId>,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        let cursor = device.current_time();
        Self {
            device,
            cursor,
            pending: HashSet::new(),
        }
    }

    /// Schedule `buffer` at `max(cursor, now)` and advance the cursor past it.
    pub fn enqueue(&mut self, buffer: PcmBuffer) -> Result<ScheduledSource> {
        let now = self.device.current_time();
        let start_at = self.cursor.max(now);
        let duration = buffer.duration_secs();

        let id = self.device.schedule(buffer, start_at)?;
        self.cursor = start_at + duration;
        self.pending.insert(id);

        tracing::trace!(id, start_at, duration, cursor = self.cursor, "playback scheduled");
        Ok(ScheduledSource {
            id,
            start_at,
            duration,
        })
    }

    /// Forget a source that finished on its own.
    pub fn on_completed(&mut self, id: SourceId) -> bool {
        self.pending.remove(&id)
    }

    /// Stop everything in flight and restart the cursor from the device clock.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.pending.len();
        for id in self.pending.drain() {
            self.device.stop_source(id);
        }
        self.cursor = self.device.current_time();
        if stopped > 0 {
            tracing::debug!(stopped, cursor = self.cursor, "playback interrupted");
        }
        stopped
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn device(&self) -> &dyn PlaybackDevice {
        self.device.as_ref()
    }

    /// Give the device back for teardown.
    pub fn into_device(self) -> Box<dyn PlaybackDevice> {
        self.device
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler")
            .field("cursor", &self.cursor)
            .field("pending", &self.pending.len())
            .finish()
    }
}
