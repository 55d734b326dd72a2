//! Command-line interface for greenlight
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Hands-free voice caddy for reading putts
#[derive(Parser, Debug)]
#[command(name = "greenlight", version, about = "Hands-free voice caddy for reading putts")]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output (transcripts are still shown)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device name
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Audio output device name
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Replay a WAV file as the microphone instead of a capture device
    #[arg(long, value_name = "PATH")]
    pub input_wav: Option<PathBuf>,

    /// Quiet time after speech before the session closes. Examples: 2s, 1500ms
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub silence_timeout: Option<Duration>,

    /// Feet per pace used to convert paces to distance
    #[arg(long, value_name = "FEET")]
    pub step_length: Option<f64>,
}

/// Parse a duration string.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`2s`, `1500ms`, `1s500ms`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the interactive caddy (Enter toggles the session, q quits)
    Run,

    /// List available audio devices
    Devices,

    /// Inspect or create the configuration file
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["greenlight"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.device.is_none());
        assert!(cli.output_device.is_none());
        assert!(cli.input_wav.is_none());
        assert!(cli.silence_timeout.is_none());
        assert!(cli.step_length.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["greenlight", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "greenlight",
            "--device",
            "hw:1",
            "--input-wav",
            "putt.wav",
            "--step-length",
            "2.5",
            "run",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Run)));
        assert_eq!(cli.device.as_deref(), Some("hw:1"));
        assert_eq!(cli.input_wav, Some(PathBuf::from("putt.wav")));
        assert_eq!(cli.step_length, Some(2.5));
    }

    #[test]
    fn test_parse_silence_timeout_formats() {
        let cli = Cli::try_parse_from(["greenlight", "--silence-timeout", "2s"]).unwrap();
        assert_eq!(cli.silence_timeout, Some(Duration::from_secs(2)));

        let cli = Cli::try_parse_from(["greenlight", "--silence-timeout", "1500"]).unwrap();
        assert_eq!(cli.silence_timeout, Some(Duration::from_millis(1500)));

        assert!(Cli::try_parse_from(["greenlight", "--silence-timeout", "soon"]).is_err());
    }

    #[test]
    fn test_parse_config_init_force() {
        let cli = Cli::try_parse_from(["greenlight", "config", "init", "--force"]).unwrap();
        match cli.command {
            Some(Commands::Config {
                action: ConfigAction::Init { force },
            }) => assert!(force),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["greenlight", "devices", "--config", "/tmp/g.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Devices)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/g.toml")));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["greenlight", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }

    #[test]
    fn test_cli_debug_assert() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
