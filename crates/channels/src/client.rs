//! Transport abstraction and the WebSocket connector.
//!
//! A [`Connector`] turns a URL into a [`Transport`]: a sink of outbound
//! text frames and a stream of inbound text frames. [`WsConnector`] is
//! the production implementation over `tokio-tungstenite`; control and
//! binary frames are handled or discarded here so the rest of the crate
//! only sees JSON text.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::endpoint::Endpoint;

/// Outbound half of a live connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Inbound half of a live connection. The stream ends (or yields an
/// error) when the connection is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// A connected duplex text channel.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transports. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Transport, ChannelError>;
}

/// Connector for real `ws://` / `wss://` endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport, ChannelError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(format!("Failed to connect to {url}: {e}")))?;

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(ChannelError::from)
            .with(|text: String| {
                futures::future::ready(Ok::<_, ChannelError>(Message::Text(text)))
            });

        let stream = stream.filter_map(|frame| {
            futures::future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "WebSocket closed by peer");
                    Some(Err(ChannelError::ClosedByPeer))
                }
                // Ping/Pong are answered by tungstenite; binary frames are
                // not part of the protocol.
                Ok(
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_),
                ) => None,
                Err(e) => Some(Err(ChannelError::from(e))),
            })
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Errors surfaced by channels.
///
/// Only [`ChannelError::NotReady`] and [`ChannelError::Encode`] ever reach
/// callers of [`ChannelConnection::send`](crate::connection::ChannelConnection::send);
/// the others drive the reconnect loop and are logged there.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A send was attempted while the channel was not open.
    #[error("Channel {endpoint} is not ready")]
    NotReady { endpoint: Endpoint },

    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connect(String),

    /// A protocol-level error on an established WebSocket.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer sent a close frame.
    #[error("Connection closed by peer")]
    ClosedByPeer,

    /// An outbound message could not be serialized.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ChannelError::NotReady { .. })
    }
}
