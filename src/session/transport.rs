//! Connection to the live agent.

use crate::error::{GreenlightError, Result};
use crate::session::protocol::{AudioChunk, InboundEvent, OutboundMessage, ToolResult};
use crate::session::setup::SessionSetup;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type InboundSender = mpsc::UnboundedSender<InboundEvent>;
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundEvent>;

/// Establishes sessions with the agent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and send `setup`. Every inbound event for this connection,
    /// including the `Opened` acknowledgement, is delivered on `events`.
    async fn connect(&self, setup: &SessionSetup, events: InboundSender) -> Result<Box<dyn Connection>>;
}

/// One live connection. Sends never block.
pub trait Connection: Send {
    fn send(&mut self, message: OutboundMessage) -> Result<()>;

    /// Close the connection. Further sends fail; calling again does nothing.
    fn close(&mut self);
}

#[derive(Debug, Default)]
struct MockTransportState {
    setups: Vec<SessionSetup>,
    sent: Vec<OutboundMessage>,
    events: Option<InboundSender>,
    connects: usize,
    open_connections: usize,
}

/// Mock transport for testing
///
/// Records everything sent and lets the test play the agent through
/// [`MockRemote`].
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
    fail_connect: bool,
    manual_open: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The agent is unreachable
    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Do not acknowledge setup; the test sends `Opened` itself
    pub fn with_manual_open(mut self) -> Self {
        self.manual_open = true;
        self
    }

    pub fn remote(&self) -> MockRemote {
        MockRemote {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, setup: &SessionSetup, events: InboundSender) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock().map_err(|e| GreenlightError::Connection {
            message: format!("Failed to lock mock transport: {}", e),
        })?;
        state.connects += 1;
        if self.fail_connect {
            return Err(GreenlightError::Connection {
                message: "remote unreachable".to_string(),
            });
        }
        state.setups.push(setup.clone());
        state.open_connections += 1;
        if !self.manual_open {
            let _ = events.send(InboundEvent::Opened);
        }
        state.events = Some(events);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MockConnection {
    state: Arc<Mutex<MockTransportState>>,
    closed: bool,
}

impl Connection for MockConnection {
    fn send(&mut self, message: OutboundMessage) -> Result<()> {
        if self.closed {
            return Err(GreenlightError::Connection {
                message: "connection is closed".to_string(),
            });
        }
        if let Ok(mut state) = self.state.lock() {
            state.sent.push(message);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Ok(mut state) = self.state.lock() {
            state.open_connections = state.open_connections.saturating_sub(1);
            state.events = None;
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Test-side view of a [`MockTransport`]: plays the agent.
#[derive(Debug, Clone)]
pub struct MockRemote {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockRemote {
    /// Deliver an event on the latest connection. False when nothing is connected.
    pub fn emit(&self, event: InboundEvent) -> bool {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.events.as_ref().map(|tx| tx.send(event).is_ok()))
            .unwrap_or(false)
    }

    pub fn connects(&self) -> usize {
        self.state.lock().map(|s| s.connects).unwrap_or(0)
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().map(|s| s.open_connections).unwrap_or(0)
    }

    pub fn setups(&self) -> Vec<SessionSetup> {
        self.state.lock().map(|s| s.setups.clone()).unwrap_or_default()
    }

    pub fn sent_audio(&self) -> Vec<AudioChunk> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Audio(chunk) => Some(chunk),
                _ => None,
            })
            .collect()
    }

    pub fn sent_tool_results(&self) -> Vec<ToolResult> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::ToolResult(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().map(|s| s.sent.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::putting::{PuttingStats, Settings};

    fn setup() -> SessionSetup {
        SessionSetup::new(&SessionConfig::default(), &PuttingStats::default(), &Settings::default())
    }

    fn chunk() -> OutboundMessage {
        OutboundMessage::Audio(AudioChunk {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: "AAA=".to_string(),
        })
    }

    #[tokio::test]
    async fn test_connect_acknowledges_setup() {
        let transport = MockTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _connection = transport.connect(&setup(), tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(InboundEvent::Opened));
        assert_eq!(transport.remote().setups().len(), 1);
        assert_eq!(transport.remote().open_connections(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let transport = MockTransport::new().with_connect_failure();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = transport.connect(&setup(), tx).await;
        assert!(matches!(result, Err(GreenlightError::Connection { .. })));
        assert_eq!(transport.remote().connects(), 1);
        assert_eq!(transport.remote().open_connections(), 0);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_sends() {
        let transport = MockTransport::new();
        let remote = transport.remote();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut connection = transport.connect(&setup(), tx).await.unwrap();

        connection.send(chunk()).unwrap();
        connection.close();
        connection.close();

        assert!(connection.send(chunk()).is_err());
        assert_eq!(remote.sent_audio().len(), 1);
        assert_eq!(remote.open_connections(), 0);
        assert!(!remote.emit(InboundEvent::Interrupted), "no events after close");
    }

    #[tokio::test]
    async fn test_manual_open_waits_for_test() {
        let transport = MockTransport::new().with_manual_open();
        let remote = transport.remote();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _connection = transport.connect(&setup(), tx).await.unwrap();

        assert!(rx.try_recv().is_err());
        assert!(remote.emit(InboundEvent::Opened));
        assert_eq!(rx.recv().await, Some(InboundEvent::Opened));
    }
}
