//! Error types for greenlight.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GreenlightError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Microphone access failed: {message}")]
    MicrophoneAccess { message: String },

    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    #[error("Frame processor failed to load: {message}")]
    FrameProcessorLoad { message: String },

    #[error("Audio device stream ended: {message}")]
    DeviceDropout { message: String },

    // Live session errors
    #[error("Session connection failed: {message}")]
    Connection { message: String },

    #[error("Remote session error: {reason}")]
    Remote { reason: String },

    #[error("Session protocol error: {message}")]
    Protocol { message: String },

    #[error("Pipeline is not running")]
    PipelineStopped,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, GreenlightError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = GreenlightError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = GreenlightError::ConfigInvalidValue {
            key: "audio.block_size".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for audio.block_size: must be positive"
        );
    }

    #[test]
    fn test_microphone_access_display() {
        let error = GreenlightError::MicrophoneAccess {
            message: "permission denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Microphone access failed: permission denied"
        );
    }

    #[test]
    fn test_connection_display() {
        let error = GreenlightError::Connection {
            message: "handshake refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Session connection failed: handshake refused"
        );
    }

    #[test]
    fn test_remote_display() {
        let error = GreenlightError::Remote {
            reason: "quota exceeded".to_string(),
        };
        assert_eq!(error.to_string(), "Remote session error: quota exceeded");
    }

    #[test]
    fn test_device_dropout_display() {
        let error = GreenlightError::DeviceDropout {
            message: "USB headset unplugged".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio device stream ended: USB headset unplugged"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: GreenlightError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: GreenlightError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<GreenlightError>();
        assert_sync::<GreenlightError>();
    }
}
