//! Per-session set of channels, one per logical endpoint.
//!
//! [`ChannelRegistry`] opens connections lazily on first use and hands out
//! the same [`ChannelConnection`] for every later lookup, so each endpoint
//! has at most one live socket and one reconnect schedule.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::{ChannelError, Connector};
use crate::connection::ChannelConnection;
use crate::endpoint::Endpoint;
use crate::reconnect::ReconnectPolicy;

pub struct ChannelRegistry {
    ws_base: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    connections: Mutex<HashMap<Endpoint, Arc<ChannelConnection>>>,
    /// Master cancellation token; every connection gets a child of it.
    cancel: CancellationToken,
}

impl ChannelRegistry {
    /// `ws_base` is the WebSocket origin, e.g. `ws://localhost:8006`.
    pub fn new(
        ws_base: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            ws_base: ws_base.into(),
            connector,
            policy,
            connections: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// The connection for `endpoint`, opening it on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn get(&self, endpoint: Endpoint) -> Arc<ChannelConnection> {
        let mut connections = self.lock();
        if let Some(existing) = connections.get(&endpoint) {
            return Arc::clone(existing);
        }

        let url = endpoint.url(&self.ws_base);
        tracing::info!(%endpoint, %url, "Opening channel");
        let connection = ChannelConnection::open(
            endpoint,
            url,
            Arc::clone(&self.connector),
            self.policy,
            self.cancel.child_token(),
        );
        connections.insert(endpoint, Arc::clone(&connection));
        connection
    }

    /// Open every known endpoint.
    pub fn start_all(&self) {
        for endpoint in Endpoint::ALL {
            self.get(endpoint);
        }
    }

    /// Whether `endpoint` is open. Does not open it.
    pub fn is_ready(&self, endpoint: Endpoint) -> bool {
        self.lock()
            .get(&endpoint)
            .is_some_and(|connection| connection.is_ready())
    }

    /// Serialize and send `message` on `endpoint`.
    pub fn send_json<T: Serialize>(
        &self,
        endpoint: Endpoint,
        message: &T,
    ) -> Result<(), ChannelError> {
        self.get(endpoint).send_json(message)
    }

    /// Endpoints that have been opened so far, in a stable order.
    pub fn opened(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.lock().keys().copied().collect();
        endpoints.sort();
        endpoints
    }

    /// Close every channel for good.
    ///
    /// Cancels the master token, then waits up to 5 seconds per channel
    /// for its task to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down channel registry");
        self.cancel.cancel();

        let drained: Vec<(Endpoint, Arc<ChannelConnection>)> = self.lock().drain().collect();
        for (endpoint, connection) in drained {
            tracing::info!(%endpoint, "Stopping channel");
            connection.close().await;
        }

        tracing::info!("Channel registry shut down complete");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Endpoint, Arc<ChannelConnection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::ChannelState;
    use crate::loopback::LoopbackConnector;

    fn loopback_registry(connector: &Arc<LoopbackConnector>) -> ChannelRegistry {
        ChannelRegistry::new("ws://loopback", connector.clone(), ReconnectPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn get_is_idempotent() {
        let (connector, mut acceptor) = LoopbackConnector::new();
        let registry = loopback_registry(&connector);

        let a = registry.get(Endpoint::ShareImage);
        let b = registry.get(Endpoint::ShareImage);
        assert!(Arc::ptr_eq(&a, &b));

        let peer = acceptor.accept().await.expect("peer");
        assert_eq!(peer.url(), "ws://loopback/ws/share_image");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn endpoints_get_separate_connections() {
        let (connector, mut acceptor) = LoopbackConnector::new();
        let registry = ChannelRegistry::new("ws://loopback", connector, ReconnectPolicy::default());
        registry.start_all();

        let mut urls = Vec::new();
        for _ in Endpoint::ALL {
            urls.push(acceptor.accept().await.expect("peer").url().to_string());
        }
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), Endpoint::ALL.len());
        assert_eq!(registry.opened().len(), Endpoint::ALL.len());
    }

    #[tokio::test(start_paused = true)]
    async fn is_ready_does_not_open() {
        let (connector, _acceptor) = LoopbackConnector::new();
        let registry = loopback_registry(&connector);

        assert!(!registry.is_ready(Endpoint::Alerts));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.attempts(), 0);
        assert!(registry.opened().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_every_channel() {
        let (connector, mut acceptor) = LoopbackConnector::new();
        let registry = loopback_registry(&connector);
        let results = registry.get(Endpoint::Results);
        let _peer = acceptor.accept().await.expect("peer");
        results
            .state_changes()
            .wait_for(|s| *s == ChannelState::Open)
            .await
            .unwrap();

        registry.shutdown().await;
        assert_eq!(results.state(), ChannelState::ClosedFinal);
        assert!(registry.opened().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
    }
}
