//! WebSocket transport for the bidirectional streaming endpoint.

use crate::config::SessionConfig;
use crate::error::{GreenlightError, Result};
use crate::session::protocol::{self, ClientMessage, InboundEvent, OutboundMessage};
use crate::session::setup::SessionSetup;
use crate::session::transport::{Connection, InboundSender, Transport};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, WsMessage>;
type WsRead = SplitStream<WsStream>;

enum Command {
    Send(ClientMessage),
    Close,
}

/// Connects to the live endpoint, authenticating with an API key query parameter.
#[derive(Clone)]
pub struct WebSocketTransport {
    endpoint: String,
    api_key: String,
}

impl WebSocketTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Requires `api_key` to have been loaded from the environment.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| GreenlightError::ConfigInvalidValue {
                key: crate::defaults::API_KEY_ENV.to_string(),
                message: "API key is not set".to_string(),
            })?;
        Ok(Self::new(config.endpoint.clone(), api_key))
    }

    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.api_key)
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, setup: &SessionSetup, events: InboundSender) -> Result<Box<dyn Connection>> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url())
            .await
            .map_err(|e| GreenlightError::Connection {
                message: e.to_string(),
            })?;
        tracing::info!(endpoint = %self.endpoint, model = %setup.model, "connected to live endpoint");

        let (mut ws_write, ws_read) = ws_stream.split();
        let json = setup.to_message().to_json()?;
        ws_write
            .send(WsMessage::Text(json))
            .await
            .map_err(|e| GreenlightError::Connection {
                message: format!("Failed to send setup: {}", e),
            })?;

        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(ws_write, ws_read, receiver, events));

        Ok(Box::new(WebSocketConnection {
            commands,
            closed: false,
        }))
    }
}

struct WebSocketConnection {
    commands: mpsc::UnboundedSender<Command>,
    closed: bool,
}

impl Connection for WebSocketConnection {
    fn send(&mut self, message: OutboundMessage) -> Result<()> {
        if self.closed {
            return Err(GreenlightError::Connection {
                message: "connection is closed".to_string(),
            });
        }
        self.commands
            .send(Command::Send(message.into()))
            .map_err(|_| GreenlightError::Connection {
                message: "connection task has stopped".to_string(),
            })
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.commands.send(Command::Close);
        }
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn dispatch(text: &str, events: &InboundSender) {
    match protocol::decode_server_message(text) {
        Ok(decoded) => {
            for event in decoded {
                let _ = events.send(event);
            }
        }
        Err(e) => tracing::warn!(error = %e, "ignoring server message"),
    }
}

/// Owns the socket: writes queued commands and turns frames into events.
///
/// A local close sends a close frame and ends silently. Anything that ends the
/// socket from the remote side is reported as `Closed`, preceded by `Error`
/// when the close was abnormal.
async fn run_connection(
    mut ws_write: WsWrite,
    mut ws_read: WsRead,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: InboundSender,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    let json = match message.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping outbound message");
                            continue;
                        }
                    };
                    if let Err(e) = ws_write.send(WsMessage::Text(json)).await {
                        tracing::error!(error = %e, "websocket write failed");
                        let _ = events.send(InboundEvent::Error { reason: e.to_string() });
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = ws_write.send(WsMessage::Close(None)).await;
                    let _ = ws_write.close().await;
                    tracing::debug!("websocket closed locally");
                    return;
                }
            },
            frame = ws_read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => dispatch(&text, &events),
                Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatch(text, &events),
                    Err(_) => tracing::debug!(len = bytes.len(), "ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = ws_write.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    if let Some(frame) = frame
                        && frame.code != CloseCode::Normal
                    {
                        tracing::warn!(code = u16::from(frame.code), reason = %frame.reason, "server closed the session");
                        let _ = events.send(InboundEvent::Error {
                            reason: format!("{} (code {})", frame.reason, u16::from(frame.code)),
                        });
                    } else {
                        tracing::info!("server closed the session");
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "websocket read failed");
                    let _ = events.send(InboundEvent::Error { reason: e.to_string() });
                    break;
                }
                None => break,
            },
        }
    }
    let _ = events.send(InboundEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_appends_key() {
        let transport = WebSocketTransport::new("wss://example.test/live", "abc");
        assert_eq!(transport.url(), "wss://example.test/live?key=abc");

        let transport = WebSocketTransport::new("wss://example.test/live?alt=json", "abc");
        assert_eq!(transport.url(), "wss://example.test/live?alt=json&key=abc");
    }

    #[test]
    fn test_from_config_requires_api_key() {
        let config = SessionConfig::default();
        assert!(matches!(
            WebSocketTransport::from_config(&config),
            Err(GreenlightError::ConfigInvalidValue { .. })
        ));

        let config = SessionConfig {
            api_key: Some("secret".to_string()),
            ..SessionConfig::default()
        };
        let transport = WebSocketTransport::from_config(&config).unwrap();
        assert!(transport.url().ends_with("?key=secret"));
        assert!(!format!("{:?}", transport).contains("secret"), "key never logged");
    }
}
