//! Framed bidirectional transport abstraction.
//!
//! The session never touches tokio-tungstenite directly: it opens a
//! [`Transport`], gets back a [`TransportSink`] for outbound traffic and an
//! mpsc receiver of [`TransportEvent`]s for inbound traffic. Production uses
//! [`WsTransport`]; tests use the channel-backed mock in [`crate::mock`].

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use url::Url;

use crate::error::Error;

/// Inbound events delivered by an open transport.
///
/// A successful [`Transport::open`] *is* the open notification; everything
/// after arrives here. `Closed` is always the final event.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
    /// The connection closed, locally or remotely.
    Closed { code: u16, reason: String },
    /// A transport-level error; a `Closed` event follows.
    Error(String),
}

/// Outbound half of an open connection.
#[async_trait]
pub trait TransportSink: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), Error>;
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error>;
}

/// Frame-size limits clamped onto the transport from configuration.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    pub max_binary: usize,
    pub max_text: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_binary: 4 * 1024 * 1024,
            max_text: 1024 * 1024,
        }
    }
}

/// Opens framed bidirectional connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url` with the given subprotocol.
    ///
    /// Returns the outbound sink and the inbound event stream. Inbound
    /// events preserve delivery order.
    async fn open(
        &self,
        url: &Url,
        subprotocol: &str,
        limits: FrameLimits,
    ) -> Result<(Box<dyn TransportSink>, mpsc::Receiver<TransportEvent>), Error>;
}

// ── WebSocket implementation ─────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Close code reported when the stream ends without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

/// Production transport over tokio-tungstenite.
#[derive(Debug, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(
        &self,
        url: &Url,
        subprotocol: &str,
        limits: FrameLimits,
    ) -> Result<(Box<dyn TransportSink>, mpsc::Receiver<TransportEvent>), Error> {
        tracing::info!(url = %url, "opening websocket");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::TransportOpen(e.to_string()))?;

        let mut request = ClientRequestBuilder::new(uri);
        if !subprotocol.is_empty() {
            request = request.with_sub_protocol(subprotocol);
        }

        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(limits.max_binary.max(limits.max_text)))
            .max_frame_size(Some(limits.max_binary.max(limits.max_text)));

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false)
                .await
                .map_err(|e| Error::TransportOpen(e.to_string()))?;

        tracing::debug!("websocket open");

        let (write, read) = ws_stream.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(read_pump(read, event_tx));

        Ok((Box::new(WsSink { write }), event_rx))
    }
}

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    tungstenite::Message,
>;

type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

struct WsSink {
    write: WsWrite,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send_text(&mut self, text: &str) -> Result<(), Error> {
        self.write
            .send(tungstenite::Message::text(text))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        let frame = tungstenite::protocol::CloseFrame {
            code: code.into(),
            reason: reason.to_string().into(),
        };
        self.write
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

/// Forward inbound frames into the event channel until the stream ends.
async fn read_pump(mut read: WsRead, event_tx: mpsc::Sender<TransportEvent>) {
    while let Some(frame) = read.next().await {
        let event = match frame {
            Ok(tungstenite::Message::Text(text)) => TransportEvent::Text(text.to_string()),
            Ok(tungstenite::Message::Binary(bytes)) => {
                TransportEvent::Binary(Bytes::from(bytes.to_vec()))
            }
            Ok(tungstenite::Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((CLOSE_ABNORMAL, String::new()));
                tracing::info!(code, reason = %reason, "websocket close frame");
                let _ = event_tx.send(TransportEvent::Closed { code, reason }).await;
                return;
            }
            // tungstenite answers pings itself
            Ok(tungstenite::Message::Ping(_)) | Ok(tungstenite::Message::Pong(_)) => continue,
            Ok(tungstenite::Message::Frame(_)) => continue,
            Err(e) => {
                let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                let _ = event_tx
                    .send(TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        };
        if event_tx.send(event).await.is_err() {
            // Session dropped its receiver; nothing left to deliver to.
            return;
        }
    }

    tracing::debug!("websocket stream ended without close frame");
    let _ = event_tx
        .send(TransportEvent::Closed {
            code: CLOSE_ABNORMAL,
            reason: "stream ended".into(),
        })
        .await;
}
