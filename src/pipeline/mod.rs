//! Voice session pipeline.
//!
//! Capture frames flow through the capture station (framing and VAD) to the
//! outbound encoder; inbound agent audio flows through the playback scheduler.
//! The lifecycle coordinator owns all of it for the duration of one session.

pub mod capture_station;
pub mod coordinator;
pub mod encoder;
pub mod observer;
pub mod scheduler;
pub mod types;
pub mod watchdog;

pub use capture_station::{CaptureConfig, CaptureStation, CapturedFrame};
pub use coordinator::{
    CoordinatorConfig, CoordinatorHandle, LifecycleCoordinator, PipelineStatus, StopReason,
    ToggleOutcome,
};
pub use encoder::OutboundEncoder;
pub use observer::{CollectorObserver, NullObserver, ObservedEvent, SessionObserver};
pub use scheduler::{PlaybackScheduler, ScheduledSource};
pub use types::{AudioFrame, PcmBuffer, Transcript, TranscriptChannel};
pub use watchdog::SilenceWatchdog;
