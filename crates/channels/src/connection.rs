//! A single auto-reconnecting duplex channel.
//!
//! [`ChannelConnection::open`] spawns one long-lived task per endpoint
//! that runs connect -> process frames -> wait -> reconnect until the
//! connection's [`CancellationToken`] fires. Because exactly one task owns
//! the lifecycle, reconnect attempts for an endpoint can never overlap.
//!
//! Sends are not buffered: while the channel is not open,
//! [`send`](ChannelConnection::send) fails with
//! [`ChannelError::NotReady`] and the caller decides what to tell the user.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{ChannelError, Connector, Transport};
use crate::endpoint::Endpoint;
use crate::reconnect::{wait_before_reconnect, ReconnectPolicy};

/// Buffered inbound frames per subscriber before it starts lagging.
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// How long [`ChannelConnection::close`] waits for the task to exit.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    /// Closed; a reconnect is scheduled.
    ClosedRetrying,
    /// Closed for good. Only reached on teardown.
    ClosedFinal,
}

/// Commands for the task driving the currently open session.
enum SessionCommand {
    Send(String),
    Close,
}

pub struct ChannelConnection {
    endpoint: Endpoint,
    url: String,
    state_tx: watch::Sender<ChannelState>,
    /// Present only while a session is open.
    session_tx: Mutex<Option<mpsc::UnboundedSender<SessionCommand>>>,
    inbound_tx: broadcast::Sender<String>,
    attempts: AtomicU32,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelConnection {
    /// Create the connection and immediately start connecting.
    ///
    /// Must be called from within a tokio runtime. The connection keeps
    /// retrying until [`close`](Self::close) is called or `cancel` fires.
    pub fn open(
        endpoint: Endpoint,
        url: String,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ChannelState::Connecting);
        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);

        let connection = Arc::new(Self {
            endpoint,
            url,
            state_tx,
            session_tx: Mutex::new(None),
            inbound_tx,
            attempts: AtomicU32::new(0),
            cancel,
            task: Mutex::new(None),
        });

        let task_connection = Arc::clone(&connection);
        let handle = tokio::spawn(async move {
            tracing::debug!(endpoint = %task_connection.endpoint, "Starting channel task");
            task_connection.run(connector, policy).await;
            tracing::debug!(endpoint = %task_connection.endpoint, "Channel task exited");
        });
        *lock(&connection.task) = Some(handle);

        connection
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.session_tx).is_some()
    }

    /// Number of connection attempts made so far, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Send a raw text frame. Fails with [`ChannelError::NotReady`] unless
    /// the channel is open; nothing is queued for later.
    pub fn send(&self, text: String) -> Result<(), ChannelError> {
        let guard = lock(&self.session_tx);
        let not_ready = || ChannelError::NotReady {
            endpoint: self.endpoint,
        };
        let tx = guard.as_ref().ok_or_else(not_ready)?;
        tx.send(SessionCommand::Send(text)).map_err(|_| not_ready())
    }

    /// Serialize `message` as JSON and send it.
    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<(), ChannelError> {
        if !self.is_ready() {
            return Err(ChannelError::NotReady {
                endpoint: self.endpoint,
            });
        }
        let text = serde_json::to_string(message)?;
        self.send(text)
    }

    /// Receive every inbound text frame from now on, in arrival order.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.inbound_tx.subscribe()
    }

    /// Observe lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    /// Drop the current session as if the peer had closed it. The normal
    /// reconnect schedule follows. Returns `false` (and does nothing) when
    /// no session is open, so repeated calls never stack reconnects.
    pub fn force_close(&self) -> bool {
        match lock(&self.session_tx).as_ref() {
            Some(tx) => tx.send(SessionCommand::Close).is_ok(),
            None => false,
        }
    }

    /// Stop the channel for good and wait briefly for its task to exit.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, handle).await;
        }
        self.set_state(ChannelState::ClosedFinal);
    }

    // ---- private helpers ----

    fn set_state(&self, state: ChannelState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(endpoint = %self.endpoint, ?previous, ?state, "Channel state changed");
        }
    }

    /// Connect -> process -> wait -> reconnect, until cancelled.
    async fn run(&self, connector: Arc<dyn Connector>, policy: ReconnectPolicy) {
        loop {
            self.set_state(ChannelState::Connecting);
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = connector.connect(&self.url) => result,
            };

            match connected {
                Ok(transport) => {
                    tracing::info!(
                        endpoint = %self.endpoint,
                        url = %self.url,
                        attempt,
                        "Channel open",
                    );
                    self.run_session(transport).await;
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        error = %e,
                        "Channel connection failed",
                    );
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ChannelState::ClosedRetrying);
            tracing::info!(
                endpoint = %self.endpoint,
                delay_ms = policy.delay.as_millis() as u64,
                "Channel closed, reconnect scheduled",
            );

            if !wait_before_reconnect(&policy, &self.cancel).await {
                break;
            }
        }

        self.set_state(ChannelState::ClosedFinal);
    }

    /// Pump one open session until it ends for any reason.
    async fn run_session(&self, transport: Transport) {
        let Transport {
            mut sink,
            mut stream,
        } = transport;
        let (session_tx, mut session_rx) = mpsc::unbounded_channel();

        *lock(&self.session_tx) = Some(session_tx);
        self.set_state(ChannelState::Open);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.close().await;
                    break;
                }
                Some(command) = session_rx.recv() => match command {
                    SessionCommand::Send(text) => {
                        if let Err(e) = sink.send(text).await {
                            tracing::warn!(
                                endpoint = %self.endpoint,
                                error = %e,
                                "Channel send failed",
                            );
                            break;
                        }
                    }
                    SessionCommand::Close => {
                        tracing::info!(endpoint = %self.endpoint, "Channel closed on request");
                        let _ = sink.close().await;
                        break;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(text)) => {
                        // Zero subscribers is fine; the frame is simply unobserved.
                        let _ = self.inbound_tx.send(text);
                    }
                    Some(Err(e)) => {
                        tracing::warn!(
                            endpoint = %self.endpoint,
                            error = %e,
                            "Channel receive error",
                        );
                        break;
                    }
                    None => {
                        tracing::info!(endpoint = %self.endpoint, "Channel stream exhausted");
                        break;
                    }
                },
            }
        }

        *lock(&self.session_tx) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::loopback::LoopbackConnector;

    const URL: &str = "ws://loopback/ws";

    fn open(connector: &Arc<LoopbackConnector>) -> Arc<ChannelConnection> {
        ChannelConnection::open(
            Endpoint::Results,
            URL.into(),
            connector.clone(),
            ReconnectPolicy::default(),
            CancellationToken::new(),
        )
    }

    async fn wait_for(connection: &ChannelConnection, state: ChannelState) {
        let mut rx = connection.state_changes();
        rx.wait_for(|s| *s == state).await.expect("state sender alive");
    }

    #[tokio::test(start_paused = true)]
    async fn opens_immediately_and_relays_frames() {
        let (connector, mut acceptor) = LoopbackConnector::new();
        let connection = open(&connector);
        let mut peer = acceptor.accept().await.expect("peer");
        wait_for(&connection, ChannelState::Open).await;

        let mut inbound = connection.subscribe();
        peer.push(r#"{"kq":[]}"#);
        assert_eq!(inbound.recv().await.unwrap(), r#"{"kq":[]}"#);

        connection.send("hello".into()).unwrap();
        assert_eq!(peer.next_sent().await.as_deref(), Some("hello"));
        assert_eq!(peer.url(), URL);
    }

    #[tokio::test(start_paused = true)]
    async fn send_while_not_open_is_not_ready() {
        let (connector, _acceptor) = LoopbackConnector::new();
        connector.refuse(true);
        let connection = open(&connector);
        wait_for(&connection, ChannelState::ClosedRetrying).await;

        assert_matches!(
            connection.send("x".into()),
            Err(ChannelError::NotReady { endpoint: Endpoint::Results })
        );
        assert!(!connection.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn close_triggers_exactly_one_reconnect_after_delay() {
        let (connector, mut acceptor) = LoopbackConnector::new();
        let connection = open(&connector);
        let peer = acceptor.accept().await.expect("peer");
        wait_for(&connection, ChannelState::Open).await;
        assert_eq!(connector.attempts(), 1);

        peer.close();
        wait_for(&connection, ChannelState::ClosedRetrying).await;

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(connector.attempts(), 2);
        let _peer = acceptor.accept().await.expect("reconnected peer");
        wait_for(&connection, ChannelState::Open).await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_force_close_never_overlaps_reconnects() {
        let (connector, mut acceptor) = LoopbackConnector::new();
        let connection = open(&connector);
        let _peer = acceptor.accept().await.expect("peer");
        wait_for(&connection, ChannelState::Open).await;

        assert!(connection.force_close());
        wait_for(&connection, ChannelState::ClosedRetrying).await;
        assert!(!connection.force_close());
        assert!(!connection.force_close());

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(connection.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_retry_forever_at_fixed_delay() {
        let (connector, _acceptor) = LoopbackConnector::new();
        connector.refuse(true);
        let connection = open(&connector);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connection.attempts(), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connection.attempts(), 2);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connection.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn close_reaches_final_state() {
        let (connector, mut acceptor) = LoopbackConnector::new();
        let connection = open(&connector);
        let _peer = acceptor.accept().await.expect("peer");
        wait_for(&connection, ChannelState::Open).await;

        connection.close().await;
        assert_eq!(connection.state(), ChannelState::ClosedFinal);
        assert!(!connection.is_ready());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connection.attempts(), 1);
    }
}
