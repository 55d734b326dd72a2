//! Subscriber interface for session events.

use crate::pipeline::types::{PcmBuffer, TranscriptChannel};
use crate::putting::{BreakResult, PuttingStats};
use crate::session::SessionState;
use std::sync::{Arc, Mutex};

/// Receives what the pipeline observes. All methods default to no-ops.
///
/// Called from the coordinator task; implementations must not block.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, _state: SessionState) {}

    fn on_audio(&self, _buffer: &PcmBuffer) {}

    /// `text` is the full transcript so far for `channel`, not a delta.
    fn on_transcript(&self, _channel: TranscriptChannel, _text: &str) {}

    /// A stats update was applied and acknowledged.
    fn on_stats_updated(&self, _stats: &PuttingStats, _result: &BreakResult) {}

    fn on_tool_invocation(&self, _name: &str, _args: &serde_json::Value, _id: &str) {}

    fn on_interrupted(&self) {}

    fn on_error(&self, _reason: &str) {}

    fn on_closed(&self) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {}

/// Events captured by [`CollectorObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    State(SessionState),
    Audio { samples: usize },
    Transcript { channel: TranscriptChannel, text: String },
    StatsUpdated { stats: PuttingStats, aim_point: String },
    ToolInvocation { name: String, id: String },
    Interrupted,
    Error(String),
    Closed,
}

/// Records every event in order. Used by tests.
#[derive(Debug, Clone, Default)]
pub struct CollectorObserver {
    events: Arc<Mutex<Vec<ObservedEvent>>>,
}

impl CollectorObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObservedEvent::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObservedEvent::Error(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ObservedEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl SessionObserver for CollectorObserver {
    fn on_state_changed(&self, state: SessionState) {
        self.push(ObservedEvent::State(state));
    }

    fn on_audio(&self, buffer: &PcmBuffer) {
        self.push(ObservedEvent::Audio {
            samples: buffer.samples.len(),
        });
    }

    fn on_transcript(&self, channel: TranscriptChannel, text: &str) {
        self.push(ObservedEvent::Transcript {
            channel,
            text: text.to_string(),
        });
    }

    fn on_stats_updated(&self, stats: &PuttingStats, result: &BreakResult) {
        self.push(ObservedEvent::StatsUpdated {
            stats: *stats,
            aim_point: result.aim_point(),
        });
    }

    fn on_tool_invocation(&self, name: &str, _args: &serde_json::Value, id: &str) {
        self.push(ObservedEvent::ToolInvocation {
            name: name.to_string(),
            id: id.to_string(),
        });
    }

    fn on_interrupted(&self) {
        self.push(ObservedEvent::Interrupted);
    }

    fn on_error(&self, reason: &str) {
        self.push(ObservedEvent::Error(reason.to_string()));
    }

    fn on_closed(&self) {
        self.push(ObservedEvent::Closed);
    }
}
