//! In-memory [`Connector`] for tests.
//!
//! Every successful `connect` hands the test a [`LoopbackPeer`] through the
//! [`LoopbackAcceptor`]. The peer plays the server: it pushes frames to the
//! client, reads what the client sent and can drop the connection.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::client::{ChannelError, Connector, Transport};

pub struct LoopbackConnector {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    refuse: AtomicBool,
    attempts: AtomicU32,
}

impl LoopbackConnector {
    pub fn new() -> (Arc<Self>, LoopbackAcceptor) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            refuse: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        });
        let acceptor = LoopbackAcceptor {
            rx,
            stash: Vec::new(),
        };
        (connector, acceptor)
    }

    /// While `true`, every connection attempt fails.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Connection attempts seen so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, url: &str) -> Result<Transport, ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect(format!("Loopback refused {url}")));
        }

        let (client_tx, peer_rx) = fmpsc::unbounded::<String>();
        let (peer_tx, client_rx) = fmpsc::unbounded::<Result<String, ChannelError>>();

        let peer = LoopbackPeer {
            url: url.to_string(),
            to_client: peer_tx,
            from_client: peer_rx,
        };
        // With the acceptor gone the peer is dropped, which reads as an
        // immediate close on the client side.
        let _ = self.peers.send(peer);

        let sink = client_tx.sink_map_err(|e| ChannelError::Transport(e.to_string()));
        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(client_rx),
        })
    }
}

/// Receives the server side of each loopback connection.
pub struct LoopbackAcceptor {
    rx: mpsc::UnboundedReceiver<LoopbackPeer>,
    stash: Vec<LoopbackPeer>,
}

impl LoopbackAcceptor {
    /// Next connection, in connect order.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        if !self.stash.is_empty() {
            return Some(self.stash.remove(0));
        }
        self.rx.recv().await
    }

    /// Next connection whose URL ends with `suffix`. Connections to other
    /// URLs are kept for later calls.
    pub async fn accept_url(&mut self, suffix: &str) -> Option<LoopbackPeer> {
        if let Some(pos) = self.stash.iter().position(|p| p.url.ends_with(suffix)) {
            return Some(self.stash.remove(pos));
        }
        loop {
            let peer = self.rx.recv().await?;
            if peer.url.ends_with(suffix) {
                return Some(peer);
            }
            self.stash.push(peer);
        }
    }
}

/// Server end of one loopback connection. Dropping it closes the connection.
pub struct LoopbackPeer {
    url: String,
    to_client: fmpsc::UnboundedSender<Result<String, ChannelError>>,
    from_client: fmpsc::UnboundedReceiver<String>,
}

impl LoopbackPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(text.into()));
    }

    /// Next frame the client sent; `None` once the client hung up.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// A frame the client already sent, without waiting.
    pub fn try_next_sent(&mut self) -> Option<String> {
        self.from_client.next().now_or_never().flatten()
    }

    /// Close from the server side.
    pub fn close(&self) {
        self.to_client.close_channel();
    }
}
