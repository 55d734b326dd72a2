//! greenlight - hands-free voice caddy for reading putts
//!
//! Full-duplex voice session with a live agent: microphone capture with voice
//! activity detection, streaming upload, gapless playback of replies, and
//! tool calls that update the putt read.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
#[cfg(feature = "cli")]
pub mod output;
pub mod pipeline;
pub mod putting;
pub mod session;

// Composition root - needs real devices and the network
#[cfg(all(feature = "cpal-audio", feature = "websocket", feature = "cli"))]
pub mod app;

// Core seams (devices, transport, observers)
pub use audio::backend::AudioBackend;
pub use audio::recorder::AudioSource;
pub use pipeline::observer::SessionObserver;
pub use session::transport::{Connection, Transport};

// Pipeline
pub use pipeline::coordinator::{
    CoordinatorConfig, CoordinatorHandle, LifecycleCoordinator, PipelineStatus, ToggleOutcome,
};

// Error handling
pub use error::{GreenlightError, Result};

// Config and domain
pub use config::Config;
pub use putting::{BreakResult, PuttingStats, Settings, calculate_break};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn test_version_string_has_hash_suffix_only_with_git_hash() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", hash_part);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
