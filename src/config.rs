use crate::defaults;
use crate::error::{GreenlightError, Result};
use crate::putting::{PuttingStats, Settings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub putting: PuttingConfig,
}

/// Audio device and frame analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub vad_threshold: f32,
    pub silence_ms: u64,
    pub block_size: usize,
}

/// Live session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub silence_timeout_ms: u64,
    /// Only ever populated from the environment.
    #[serde(skip)]
    pub api_key: Option<String>,
}

/// Golfer settings and the putt read used before the first tool call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PuttingConfig {
    pub step_length: f64,
    pub distance: f64,
    pub slope_side: f64,
    pub slope_vertical: f64,
    pub stimp: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            vad_threshold: defaults::VAD_THRESHOLD,
            silence_ms: defaults::SILENCE_MS,
            block_size: defaults::BLOCK_SIZE,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::DEFAULT_ENDPOINT.to_string(),
            model: defaults::DEFAULT_MODEL.to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            silence_timeout_ms: defaults::SILENCE_TIMEOUT_MS,
            api_key: None,
        }
    }
}

impl Default for PuttingConfig {
    fn default() -> Self {
        Self {
            step_length: defaults::STEP_LENGTH_FT,
            distance: defaults::INITIAL_DISTANCE_FT,
            slope_side: defaults::INITIAL_SLOPE_SIDE,
            slope_vertical: defaults::INITIAL_SLOPE_VERTICAL,
            stimp: defaults::INITIAL_STIMP,
        }
    }
}

impl PuttingConfig {
    pub fn initial_stats(&self) -> PuttingStats {
        PuttingStats {
            distance: self.distance,
            slope_side: self.slope_side,
            slope_vertical: self.slope_vertical,
            stimp: self.stimp,
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            step_length: self.step_length,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only falls back to defaults when the file is missing.
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - GREENLIGHT_API_KEY → session.api_key
    /// - GREENLIGHT_MODEL → session.model
    /// - GREENLIGHT_ENDPOINT → session.endpoint
    /// - GREENLIGHT_AUDIO_DEVICE → audio.input_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(defaults::API_KEY_ENV)
            && !key.is_empty()
        {
            self.session.api_key = Some(key);
        }

        if let Ok(model) = std::env::var("GREENLIGHT_MODEL")
            && !model.is_empty()
        {
            self.session.model = model;
        }

        if let Ok(endpoint) = std::env::var("GREENLIGHT_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.session.endpoint = endpoint;
        }

        if let Ok(device) = std::env::var("GREENLIGHT_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> GreenlightError {
            GreenlightError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if !(self.audio.vad_threshold > 0.0 && self.audio.vad_threshold < 1.0) {
            return Err(invalid("audio.vad_threshold", "must be between 0 and 1"));
        }
        if self.audio.silence_ms == 0 {
            return Err(invalid("audio.silence_ms", "must be positive"));
        }
        if self.audio.block_size == 0 {
            return Err(invalid("audio.block_size", "must be positive"));
        }
        if self.session.silence_timeout_ms == 0 {
            return Err(invalid("session.silence_timeout_ms", "must be positive"));
        }
        if self.session.model.trim().is_empty() {
            return Err(invalid("session.model", "must not be empty"));
        }
        if self.putting.step_length.is_nan() || self.putting.step_length <= 0.0 {
            return Err(invalid("putting.step_length", "must be positive"));
        }
        if self.putting.distance < 0.0 {
            return Err(invalid("putting.distance", "must not be negative"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/greenlight/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| GreenlightError::Other("Could not determine config directory".into()))?;
        Ok(dir.join("greenlight").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_greenlight_env() {
        remove_env("GREENLIGHT_API_KEY");
        remove_env("GREENLIGHT_MODEL");
        remove_env("GREENLIGHT_ENDPOINT");
        remove_env("GREENLIGHT_AUDIO_DEVICE");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.vad_threshold, 0.01);
        assert_eq!(config.audio.silence_ms, 1000);
        assert_eq!(config.audio.block_size, 4096);

        assert_eq!(config.session.voice, "Zephyr");
        assert_eq!(config.session.silence_timeout_ms, 2000);
        assert_eq!(config.session.api_key, None);

        assert_eq!(config.putting.step_length, 3.0);
        assert_eq!(config.putting.distance, 12.0);
        assert_eq!(config.putting.slope_side, 1.0);
        assert_eq!(config.putting.stimp, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [audio]
            input_device = "hw:0,0"
            vad_threshold = 0.05
            silence_ms = 750

            [session]
            voice = "Puck"
            silence_timeout_ms = 3500

            [putting]
            step_length = 2.5
            stimp = 12.0
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.vad_threshold, 0.05);
        assert_eq!(config.audio.silence_ms, 750);
        assert_eq!(config.audio.block_size, 4096);
        assert_eq!(config.session.voice, "Puck");
        assert_eq!(config.session.silence_timeout_ms, 3500);
        assert_eq!(config.putting.settings().step_length, 2.5);
        assert_eq!(config.putting.initial_stats().stimp, 12.0);
        assert_eq!(config.putting.initial_stats().distance, 12.0);
    }

    #[test]
    fn test_api_key_is_never_read_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[session]\napi_key = \"leaked\"\n")
            .unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.session.api_key, None);

        let serialized = toml::to_string(&config).unwrap();
        assert!(
            !serialized.contains("api_key"),
            "api_key must not be serialized, got: {}",
            serialized
        );
    }

    #[test]
    fn test_env_override_all() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_greenlight_env();

        set_env("GREENLIGHT_API_KEY", "secret");
        set_env("GREENLIGHT_MODEL", "models/other");
        set_env("GREENLIGHT_ENDPOINT", "ws://127.0.0.1:9000");
        set_env("GREENLIGHT_AUDIO_DEVICE", "pulse");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.session.api_key.as_deref(), Some("secret"));
        assert_eq!(config.session.model, "models/other");
        assert_eq!(config.session.endpoint, "ws://127.0.0.1:9000");
        assert_eq!(config.audio.input_device, Some("pulse".to_string()));

        clear_greenlight_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_greenlight_env();

        set_env("GREENLIGHT_MODEL", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.session.model, defaults::DEFAULT_MODEL);

        clear_greenlight_env();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.audio.vad_threshold = 0.0;
        assert!(matches!(
            config.validate(),
            Err(GreenlightError::ConfigInvalidValue { ref key, .. }) if key == "audio.vad_threshold"
        ));

        let mut config = Config::default();
        config.audio.block_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.putting.step_length = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[audio\ninput_device = \"broken\n")
            .unwrap();

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_default_path_ends_with_config_toml() {
        if let Ok(path) = Config::default_path() {
            let path_str = path.to_string_lossy();
            assert!(path_str.contains("greenlight"));
            assert!(path_str.ends_with("config.toml"));
        }
    }
}
