use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use greenlight_voice::app::{list_audio_devices, run_session_command};
use greenlight_voice::cli::{Cli, Commands, ConfigAction};
use greenlight_voice::config::Config;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    tracing::debug!(version = %greenlight_voice::version_string(), "greenlight starting");

    match cli.command {
        None | Some(Commands::Run) => {
            let config = load_config(&cli)?;
            run_session_command(config, cli.input_wav, cli.quiet).await?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { ref action }) => {
            handle_config_command(action, &cli)?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "greenlight",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `-v` flags raise the crate's level.
fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "greenlight_voice=warn",
        1 => "greenlight_voice=info",
        2 => "greenlight_voice=debug",
        _ => "greenlight_voice=trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn config_path(custom_path: Option<&Path>) -> Result<PathBuf> {
    match custom_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(Config::default_path()?),
    }
}

/// Load configuration from file or use defaults.
///
/// Priority order (highest first):
/// 1. CLI flags
/// 2. Environment variables (GREENLIGHT_*)
/// 3. Config file (--config or ~/.config/greenlight/config.toml)
/// 4. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let path = config_path(cli.config.as_deref())?;
    let mut config = if cli.config.is_some() {
        Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::load_or_default(&path)?
    }
    .with_env_overrides();

    if let Some(device) = &cli.device {
        config.audio.input_device = Some(device.clone());
    }
    if let Some(device) = &cli.output_device {
        config.audio.output_device = Some(device.clone());
    }
    if let Some(timeout) = cli.silence_timeout {
        config.session.silence_timeout_ms = timeout.as_millis() as u64;
    }
    if let Some(step_length) = cli.step_length {
        config.putting.step_length = step_length;
    }

    config.validate()?;
    Ok(config)
}

/// Handle configuration commands.
fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    let path = config_path(cli.config.as_deref())?;

    match action {
        ConfigAction::Show => {
            let config = load_config(cli)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                eprintln!(
                    "{}",
                    format!(
                        "Config already exists at {} (use --force to overwrite)",
                        path.display()
                    )
                    .yellow()
                );
                std::process::exit(1);
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, toml::to_string_pretty(&Config::default())?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} {}", "Wrote".green(), path.display());
        }
    }
    Ok(())
}
