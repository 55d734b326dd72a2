//! Default configuration constants for greenlight.
//!
//! Shared by the config layer and the pipeline so the two never drift apart.

/// Capture sample rate in Hz.
///
/// The live session expects 16kHz mono PCM on the uplink.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Playback sample rate in Hz.
///
/// Synthesized replies arrive as 24kHz mono PCM.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples per capture frame.
///
/// 4096 samples at 16kHz is 256ms.
pub const BLOCK_SIZE: usize = 4096;

/// RMS threshold (0.0 to 1.0) above which a frame counts as speech.
pub const VAD_THRESHOLD: f32 = 0.01;

/// Quiet time required to leave the speaking state.
///
/// Converted to whole capture frames, rounded up, by [`crate::audio::vad::silence_frames_for`].
pub const SILENCE_MS: u64 = 1000;

/// Emit a VAD debug line every this many frames.
pub const VAD_LOG_INTERVAL: u64 = 100;

/// Quiet time after speech ends before the session is closed automatically.
pub const SILENCE_TIMEOUT_MS: u64 = 2000;

/// MIME type attached to every outbound audio chunk.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Live model used for the conversation.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

/// Prebuilt voice profile for replies.
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Bidirectional streaming endpoint. The API key is appended as a query parameter.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Name of the single tool the agent may call.
pub const TOOL_UPDATE_STATS: &str = "updatePuttingStats";

/// Average stride length in feet, used to turn paces into feet.
pub const STEP_LENGTH_FT: f64 = 3.0;

// Initial putt read before the golfer says anything.
pub const INITIAL_DISTANCE_FT: f64 = 12.0;
pub const INITIAL_SLOPE_SIDE: f64 = 1.0;
pub const INITIAL_SLOPE_VERTICAL: f64 = 0.0;
pub const INITIAL_STIMP: f64 = 10.0;

/// Regulation cup radius in inches.
pub const HOLE_RADIUS_IN: f64 = 2.125;

/// Env var holding the API key. The key is never written to the config file.
pub const API_KEY_ENV: &str = "GREENLIGHT_API_KEY";
