//! Interactive caddy entry point.
//!
//! Wires real devices and the live session into a coordinator and drives it
//! from stdin: Enter toggles the session, `q` quits.

use crate::audio::backend::CpalBackend;
use crate::audio::capture::list_devices;
use crate::config::Config;
use crate::error::Result;
use crate::output::{TerminalObserver, format_stats, state_label};
use crate::pipeline::coordinator::{
    CoordinatorConfig, CoordinatorHandle, LifecycleCoordinator, ToggleOutcome,
};
use crate::putting::{Settings, calculate_break};
use crate::session::websocket::WebSocketTransport;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::io::{AsyncBufReadExt, BufReader};

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq)]
enum Input {
    Toggle,
    Quit,
    Status,
    Read,
    StepLength(f64),
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let mut words = line.split_whitespace();
    match words.next() {
        None => Input::Toggle,
        Some("q" | "quit" | "exit") => Input::Quit,
        Some("status") => Input::Status,
        Some("read") => Input::Read,
        Some("step") => match words.next().and_then(|w| w.parse::<f64>().ok()) {
            Some(feet) if feet > 0.0 => Input::StepLength(feet),
            _ => Input::Unknown(line.to_string()),
        },
        Some(_) => Input::Unknown(line.to_string()),
    }
}

/// Run the interactive caddy until the user quits or presses Ctrl+C.
pub async fn run_session_command(
    config: Config,
    input_wav: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let transport = WebSocketTransport::from_config(&config.session)?;

    let mut backend = CpalBackend::new(
        config.audio.input_device.clone(),
        config.audio.output_device.clone(),
    );
    if let Some(path) = input_wav {
        backend = backend.with_input_wav(path);
    }

    let stats = Arc::new(RwLock::new(config.putting.initial_stats()));
    let settings = Arc::new(RwLock::new(config.putting.settings()));

    let (handle, task) = LifecycleCoordinator::new(
        Arc::new(backend),
        Arc::new(transport),
        CoordinatorConfig::from_config(&config),
    )
    .with_observer(Arc::new(TerminalObserver::new(quiet)))
    .with_shared_state(stats, settings)
    .spawn();

    if !quiet {
        eprintln!(
            "{}",
            format!("Read: {}", format_stats(&handle.stats())).dimmed()
        );
        eprintln!(
            "{}",
            "Enter: start/stop  status  read  step <ft>  q: quit".dimmed()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Toggle => spawn_toggle(handle.clone()),
                    Input::Quit => break,
                    Input::Status => print_status(&handle).await,
                    Input::Read => print_read(&handle),
                    Input::StepLength(feet) => {
                        handle.set_settings(Settings { step_length: feet });
                        eprintln!("{}", format!("Pace length set to {}ft", feet).dimmed());
                    }
                    Input::Unknown(text) => {
                        eprintln!("{}", format!("Unknown command: {}", text).yellow());
                    }
                }
            }
        }
    }

    if let Err(e) = handle.shutdown().await {
        tracing::warn!(error = %e, "coordinator already stopped");
    }
    if let Err(e) = task.await {
        tracing::error!(error = %e, "coordinator task failed");
    }
    Ok(())
}

// Start can take seconds while the session opens; keep the prompt responsive.
fn spawn_toggle(handle: CoordinatorHandle) {
    tokio::spawn(async move {
        match handle.toggle().await {
            Ok(ToggleOutcome::Ignored) => {
                eprintln!("{}", "Still switching, try again".dimmed());
            }
            Ok(outcome) => tracing::debug!(?outcome, "toggle finished"),
            Err(e) => eprintln!("{}", format!("Could not start: {}", e).red()),
        }
    });
}

async fn print_status(handle: &CoordinatorHandle) {
    match handle.status().await {
        Ok(status) => {
            eprintln!(
                "session {}  mic {}  speaking {}  frames {}/{}  queued {}",
                state_label(status.session_state),
                if status.microphone_held { "on" } else { "off" },
                status.speaking,
                status.frames_sent,
                status.frames_captured,
                status.pending_playback,
            );
            if !status.transcript.input.is_empty() {
                eprintln!("  {} {}", "you:".dimmed(), status.transcript.input);
            }
            if !status.transcript.output.is_empty() {
                eprintln!("  {} {}", "caddy:".cyan(), status.transcript.output);
            }
        }
        Err(e) => eprintln!("{}", format!("Error: {}", e).red()),
    }
}

fn print_read(handle: &CoordinatorHandle) {
    let stats = handle.stats();
    let result = calculate_break(&stats, &handle.settings());
    eprintln!(
        "{}  {} {}",
        format_stats(&stats),
        result.aim_point().bold(),
        format!("({}, plays {}ft)", result.aim_description, result.effective_distance).dimmed()
    );
}

/// Print the capture and playback devices cpal can see.
pub fn list_audio_devices() -> Result<()> {
    let (inputs, outputs) = list_devices()?;

    println!("Audio input devices:");
    if inputs.is_empty() {
        println!("  (none)");
    }
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    println!("Audio output devices:");
    if outputs.is_empty() {
        println!("  (none)");
    }
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    Ok(())
}
