//! Terminal rendering of session events.

use crate::pipeline::observer::SessionObserver;
use crate::pipeline::types::TranscriptChannel;
use crate::putting::{BreakResult, PuttingStats};
use crate::session::SessionState;
use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::sync::Mutex;

/// Clear the current terminal line.
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// One-line summary of the current read.
pub fn format_stats(stats: &PuttingStats) -> String {
    format!(
        "{}ft  side {:+}%  vertical {:+}%  stimp {}",
        stats.distance, stats.slope_side, stats.slope_vertical, stats.stimp
    )
}

pub fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Idle => "idle",
        SessionState::Opening => "connecting",
        SessionState::Open => "listening",
        SessionState::Closing => "closing",
        SessionState::Closed => "closed",
    }
}

/// Prints transcripts and read updates to stderr.
///
/// Transcript updates are cumulative, so the current line is redrawn until
/// the channel changes.
pub struct TerminalObserver {
    quiet: bool,
    last_channel: Mutex<Option<TranscriptChannel>>,
}

impl TerminalObserver {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            last_channel: Mutex::new(None),
        }
    }

    fn end_transcript_line(&self) {
        if let Ok(mut last) = self.last_channel.lock()
            && last.take().is_some()
        {
            eprintln!();
        }
    }
}

impl SessionObserver for TerminalObserver {
    fn on_state_changed(&self, state: SessionState) {
        if self.quiet {
            return;
        }
        self.end_transcript_line();
        let label = state_label(state);
        match state {
            SessionState::Open => eprintln!("{}", format!("● {}", label).green()),
            SessionState::Idle => eprintln!("{}", format!("○ {} (Enter to start)", label).dimmed()),
            _ => eprintln!("{}", format!("… {}", label).dimmed()),
        }
    }

    fn on_transcript(&self, channel: TranscriptChannel, text: &str) {
        let Ok(mut last) = self.last_channel.lock() else {
            return;
        };
        if *last == Some(channel) {
            clear_line();
        } else if last.is_some() {
            eprintln!();
        }
        *last = Some(channel);
        match channel {
            TranscriptChannel::Input => eprint!("{} {}", "you:".dimmed(), text),
            TranscriptChannel::Output => eprint!("{} {}", "caddy:".cyan(), text),
        }
        io::stderr().flush().ok();
    }

    fn on_stats_updated(&self, stats: &PuttingStats, result: &BreakResult) {
        self.end_transcript_line();
        eprintln!(
            "{} {}  {} {}",
            "read:".dimmed(),
            format_stats(stats),
            result.aim_point().bold(),
            format!("({})", result.aim_description).dimmed()
        );
    }

    fn on_interrupted(&self) {
        if let Ok(mut last) = self.last_channel.lock()
            && *last == Some(TranscriptChannel::Output)
        {
            eprintln!(" {}", "[interrupted]".yellow());
            *last = None;
        }
    }

    fn on_error(&self, reason: &str) {
        self.end_transcript_line();
        eprintln!("{}", format!("Error: {}", reason).red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_stats_signs() {
        let stats = PuttingStats {
            distance: 9.0,
            slope_side: -2.0,
            slope_vertical: 1.5,
            stimp: 11.0,
        };
        assert_eq!(format_stats(&stats), "9ft  side -2%  vertical +1.5%  stimp 11");
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(state_label(SessionState::Open), "listening");
        assert_eq!(state_label(SessionState::Opening), "connecting");
    }

    #[test]
    fn test_transcript_channel_tracking() {
        let observer = TerminalObserver::new(true);
        observer.on_transcript(TranscriptChannel::Input, "ten");
        observer.on_transcript(TranscriptChannel::Input, "ten feet");
        assert_eq!(*observer.last_channel.lock().unwrap(), Some(TranscriptChannel::Input));

        observer.on_transcript(TranscriptChannel::Output, "Aim two");
        observer.on_interrupted();
        assert_eq!(*observer.last_channel.lock().unwrap(), None);
    }
}
