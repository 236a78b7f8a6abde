//! Channel-backed mock transport for session and supervisor tests.
//!
//! [`mock_transport`] yields a [`Transport`] whose every `open` call hands
//! the test a [`MockRemote`]: the controller's side of the connection. The
//! remote observes outbound frames and injects inbound ones, so handshake
//! and telemetry scenarios run without sockets.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Error;
use crate::transport::{FrameLimits, Transport, TransportEvent, TransportSink};
use crate::wire;

/// A frame the session pushed onto the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum SentFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Create a mock transport and the stream of remotes it produces.
///
/// Each `open` call produces one fresh [`MockRemote`], so reconnect tests
/// simply receive the next remote.
pub fn mock_transport() -> (Arc<MockTransport>, mpsc::UnboundedReceiver<MockRemote>) {
    let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
    (Arc::new(MockTransport { remotes_tx }), remotes_rx)
}

pub struct MockTransport {
    remotes_tx: mpsc::UnboundedSender<MockRemote>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        url: &Url,
        _subprotocol: &str,
        _limits: FrameLimits,
    ) -> Result<(Box<dyn TransportSink>, mpsc::Receiver<TransportEvent>), Error> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);

        let remote = MockRemote {
            url: url.clone(),
            sent_rx,
            event_tx: event_tx.clone(),
        };
        self.remotes_tx
            .send(remote)
            .map_err(|_| Error::TransportOpen("mock transport dropped".into()))?;

        Ok((Box::new(MockSink { sent_tx, event_tx }), event_rx))
    }
}

struct MockSink {
    sent_tx: mpsc::UnboundedSender<SentFrame>,
    event_tx: mpsc::Sender<TransportEvent>,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send_text(&mut self, text: &str) -> Result<(), Error> {
        self.sent_tx
            .send(SentFrame::Text(text.to_string()))
            .map_err(|_| Error::Transport("mock remote gone".into()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        let _ = self.sent_tx.send(SentFrame::Close {
            code,
            reason: reason.to_string(),
        });
        // Mirror a real transport: the close round-trips as a Closed event.
        let _ = self
            .event_tx
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
        Ok(())
    }
}

/// The controller's end of a mocked connection.
pub struct MockRemote {
    pub url: Url,
    sent_rx: mpsc::UnboundedReceiver<SentFrame>,
    event_tx: mpsc::Sender<TransportEvent>,
}

impl MockRemote {
    /// Next frame the session sent, in order.
    pub async fn next_sent(&mut self) -> Option<SentFrame> {
        self.sent_rx.recv().await
    }

    /// Next sent frame, asserting it is text.
    pub async fn expect_text(&mut self) -> String {
        match self.next_sent().await {
            Some(SentFrame::Text(text)) => text,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// Whether a frame is waiting without blocking.
    pub fn try_sent(&mut self) -> Option<SentFrame> {
        self.sent_rx.try_recv().ok()
    }

    pub async fn send_text(&self, text: impl Into<String>) {
        let _ = self.event_tx.send(TransportEvent::Text(text.into())).await;
    }

    pub async fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self
            .event_tx
            .send(TransportEvent::Binary(Bytes::from(bytes)))
            .await;
    }

    pub async fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self
            .event_tx
            .send(TransportEvent::Closed {
                code,
                reason: reason.into(),
            })
            .await;
    }

    /// Reply to `sent_command` with the controller's response envelope,
    /// applying the echoed-prefix quirk (`jdev/` commands echo as `dev/`).
    pub async fn reply(&self, sent_command: &str, value: serde_json::Value, code: u16) {
        let echoed = sent_command
            .strip_prefix("jdev/")
            .map(|rest| format!("dev/{rest}"))
            .unwrap_or_else(|| sent_command.to_string());

        let body = serde_json::json!({
            "LL": { "control": echoed, "value": value, "code": code.to_string() }
        });
        self.send_text(body.to_string()).await;
    }

    pub async fn reply_ok(&self, sent_command: &str, value: &str) {
        self.reply(sent_command, serde_json::Value::String(value.into()), 200)
            .await;
    }

    /// Push a value-state table: header frame, then the payload frame.
    pub async fn send_value_states(&self, updates: &[(wire::ObjectId, f64)]) {
        let mut payload = Vec::with_capacity(updates.len() * 24);
        for (id, value) in updates {
            payload.extend_from_slice(&wire::encode_value_record(*id, *value));
        }
        self.send_binary(
            wire::encode_header(wire::PayloadKind::ValueStates, payload.len() as u32).to_vec(),
        )
        .await;
        self.send_binary(payload).await;
    }

    /// Push a text-state table: header frame, then the payload frame.
    pub async fn send_text_states(&self, updates: &[(wire::ObjectId, &str)]) {
        let mut payload = Vec::new();
        for (id, text) in updates {
            payload.extend_from_slice(&wire::encode_text_record(
                *id,
                wire::ObjectId([0; 16]),
                text,
            ));
        }
        self.send_binary(
            wire::encode_header(wire::PayloadKind::TextStates, payload.len() as u32).to_vec(),
        )
        .await;
        self.send_binary(payload).await;
    }
}
