//! STOMP over WebSocket transport.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{RealtimeError, Result};
use crate::stomp::{Command, Frame};
use crate::transport::{SubscriptionHandle, Transport, TransportEvent, TransportSender};

/// How long to wait for the broker's `CONNECTED` frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

struct Session {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// A [`Transport`] speaking STOMP 1.2 to a WebSocket broker.
pub struct StompTransport {
    url: String,
    auth_token: Option<String>,
    session: Mutex<Option<Session>>,
}

impl StompTransport {
    /// Create a transport for the broker at `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            session: Mutex::new(None),
        }
    }

    /// Sends `token` as a bearer `Authorization` header on connect.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn host(&self) -> &str {
        let rest = self.url.split_once("://").map_or(self.url.as_str(), |(_, r)| r);
        rest.split('/').next().unwrap_or(rest)
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", self.host())
            .header("heart-beat", "0,0");
        if let Some(token) = &self.auth_token {
            frame = frame.header("Authorization", format!("Bearer {token}"));
        }
        frame
    }

    fn send(&self, frame: Frame) -> Result<()> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(RealtimeError::NotConnected)?;
        session
            .outbound
            .send(Message::Text(frame.encode()))
            .map_err(|_| RealtimeError::ChannelClosed)
    }
}

fn message_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text),
        Message::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

#[async_trait]
impl Transport for StompTransport {
    async fn open(&self, events: TransportSender) -> Result<()> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        sink.send(Message::Text(self.connect_frame().encode()))
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        let handshake = async {
            while let Some(message) = stream.next().await {
                let message = message.map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
                let Some(text) = message_text(message) else {
                    continue;
                };
                match Frame::decode(&text)? {
                    Some(frame) if frame.command == Command::Connected => return Ok(frame),
                    Some(frame) if frame.command == Command::Error => {
                        return Err(RealtimeError::Protocol(
                            frame.get("message").unwrap_or("broker refused connection").to_string(),
                        ))
                    }
                    _ => {}
                }
            }
            Err(RealtimeError::ConnectionFailed(
                "closed during handshake".to_string(),
            ))
        };
        let connected = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .map_err(|_| RealtimeError::ConnectionFailed("handshake timed out".to_string()))??;
        info!(
            url = %self.url,
            version = connected.get("version").unwrap_or("1.2"),
            "STOMP session established"
        );

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            let end = loop {
                let message = match stream.next().await {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => break TransportEvent::Error { message: e.to_string() },
                    None => break TransportEvent::Closed { reason: None },
                };
                if let Message::Close(close) = &message {
                    break TransportEvent::Closed {
                        reason: close.as_ref().map(|c| c.reason.to_string()),
                    };
                }
                let Some(text) = message_text(message) else {
                    continue;
                };
                match Frame::decode(&text) {
                    Ok(Some(frame)) if frame.command == Command::Message => {
                        let Some(topic) = frame.get("destination").map(str::to_string) else {
                            warn!("MESSAGE frame without destination");
                            continue;
                        };
                        let _ = events.send(TransportEvent::Message {
                            topic,
                            payload: frame.body,
                        });
                    }
                    Ok(Some(frame)) if frame.command == Command::Error => {
                        break TransportEvent::Error {
                            message: frame.get("message").unwrap_or("broker error").to_string(),
                        };
                    }
                    Ok(Some(frame)) => debug!(command = %frame.command, "Ignoring frame"),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Undecodable STOMP frame"),
                }
            };
            let _ = events.send(end);
        });

        let previous = self.session.lock().replace(Session {
            outbound,
            reader,
            writer,
        });
        if let Some(previous) = previous {
            previous.reader.abort();
            previous.writer.abort();
        }
        Ok(())
    }

    async fn subscribe(&self, destination: &str) -> Result<SubscriptionHandle> {
        let id = uuid::Uuid::new_v4().to_string();
        self.send(
            Frame::new(Command::Subscribe)
                .header("id", id.as_str())
                .header("destination", destination)
                .header("ack", "auto"),
        )
        .map_err(|e| RealtimeError::SubscribeFailed {
            topic: destination.to_string(),
            reason: e.to_string(),
        })?;
        debug!(destination, id = %id, "SUBSCRIBE sent");
        Ok(SubscriptionHandle::new(id))
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.send(Frame::new(Command::Unsubscribe).header("id", handle.as_str()))
    }

    async fn close(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.reader.abort();
        let _ = session
            .outbound
            .send(Message::Text(Frame::new(Command::Disconnect).encode()));
        drop(session.outbound);
        if let Err(e) = session.writer.await {
            debug!(error = %e, "WebSocket writer ended abnormally");
        }
        info!(url = %self.url, "STOMP session closed");
    }
}

impl std::fmt::Debug for StompTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StompTransport")
            .field("url", &self.url)
            .field("authenticated", &self.auth_token.is_some())
            .field("open", &self.session.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_frame() {
        let transport = StompTransport::new("ws://broker.local:8080/ws").with_auth_token("abc");
        let frame = transport.connect_frame();
        assert_eq!(frame.get("host"), Some("broker.local:8080"));
        assert_eq!(frame.get("accept-version"), Some("1.2"));
        assert_eq!(frame.get("Authorization"), Some("Bearer abc"));
    }

    #[tokio::test]
    async fn test_subscribe_without_session() {
        let transport = StompTransport::new("ws://localhost:1/ws");
        let result = transport.subscribe("/topic/projects").await;
        assert!(matches!(result, Err(RealtimeError::SubscribeFailed { .. })));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_open_unreachable_broker_fails() {
        let transport = StompTransport::new("ws://127.0.0.1:1/ws");
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = transport.open(tx).await;
        assert!(matches!(result, Err(RealtimeError::ConnectionFailed(_))));
    }
}
