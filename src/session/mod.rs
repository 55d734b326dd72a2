//! Live session with the remote agent.
//!
//! [`Session`] is the one authority on whether anything may be sent. It never
//! awaits; connecting happens elsewhere and the result is handed in through
//! [`Session::attach`].

pub mod protocol;
pub mod setup;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod websocket;

use crate::error::{GreenlightError, Result};
use crate::session::protocol::{AudioChunk, OutboundMessage, ToolResult};
use crate::session::transport::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Session state plus the connection it owns.
pub struct Session {
    state: SessionState,
    connection: Option<Box<dyn Connection>>,
    sent: u64,
    dropped: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            connection: None,
            sent: 0,
            dropped: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Messages transmitted and messages discarded because the session was not open.
    pub fn counters(&self) -> (u64, u64) {
        (self.sent, self.dropped)
    }

    /// `Idle -> Opening`.
    pub fn begin_open(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(GreenlightError::Protocol {
                message: format!("cannot open a session that is {}", self.state),
            });
        }
        self.state = SessionState::Opening;
        Ok(())
    }

    /// Hand over the established connection. If the session stopped opening in
    /// the meantime the connection is closed and an error returned.
    pub fn attach(&mut self, mut connection: Box<dyn Connection>) -> Result<()> {
        if self.state != SessionState::Opening {
            connection.close();
            return Err(GreenlightError::Protocol {
                message: format!("connection arrived while session is {}", self.state),
            });
        }
        self.connection = Some(connection);
        Ok(())
    }

    /// Opening failed; go back to `Idle` holding nothing.
    pub fn abort_open(&mut self) {
        if self.state == SessionState::Opening {
            if let Some(mut connection) = self.connection.take() {
                connection.close();
            }
            self.state = SessionState::Idle;
        }
    }

    /// The agent acknowledged setup. `Opening -> Open`; ignored in any other state.
    pub fn on_opened(&mut self) -> bool {
        if self.state == SessionState::Opening && self.connection.is_some() {
            self.state = SessionState::Open;
            tracing::info!("session open");
            true
        } else {
            tracing::debug!(state = %self.state, "ignoring open acknowledgement");
            false
        }
    }

    pub fn send_audio(&mut self, chunk: AudioChunk) -> bool {
        self.send(OutboundMessage::Audio(chunk))
    }

    pub fn send_tool_result(&mut self, result: ToolResult) -> bool {
        self.send(OutboundMessage::ToolResult(result))
    }

    /// Transmit only while open. Anything else is dropped without error.
    fn send(&mut self, message: OutboundMessage) -> bool {
        let connection = match (self.state, self.connection.as_mut()) {
            (SessionState::Open, Some(connection)) => connection,
            _ => {
                self.dropped += 1;
                return false;
            }
        };
        match connection.send(message) {
            Ok(()) => {
                self.sent += 1;
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "send failed");
                self.dropped += 1;
                false
            }
        }
    }

    /// Close from any state. Only the first call does work.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        let previous = self.state;
        self.state = SessionState::Closing;
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.state = SessionState::Closed;
        tracing::debug!(from = %previous, sent = self.sent, dropped = self.dropped, "session closed");
        true
    }

    /// The remote side ended the session.
    pub fn on_remote_closed(&mut self) -> bool {
        self.close()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("connected", &self.connection.is_some())
            .field("sent", &self.sent)
            .field("dropped", &self.dropped)
            .finish()
    }
}
