//! One user's live session: channels, view state and request dispatch
//! behind a single constructor/teardown pair.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use framesync_channels::{
    ApiError, ChannelRegistry, Connector, Endpoint, GoogleTranslator, HealthStatus, ReconnectPolicy,
    SearchApi, SearchBackend, Translator, WsConnector,
};
use framesync_core::preferences::PreferenceStore;
use framesync_core::types::Timestamp;
use framesync_events::{EventBus, SessionEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::coordinator::RequestCoordinator;
use crate::error::SessionError;
use crate::export_session::ExportSession;
use crate::router::{spawn_routers, InboundRouter};
use crate::view::SharedView;
use crate::watchdog::ResponseWatchdog;

/// How long [`Session::shutdown`] waits for each router task.
const ROUTER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Session {
    id: Uuid,
    started_at: Timestamp,
    config: ClientConfig,
    bus: Arc<EventBus>,
    view: Arc<SharedView>,
    registry: Arc<ChannelRegistry>,
    backend: Arc<dyn SearchBackend>,
    coordinator: Arc<RequestCoordinator>,
    exports: Arc<ExportSession>,
    cancel: CancellationToken,
    routers: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Start a session against the configured backend over real sockets.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: ClientConfig) -> Result<Self, SessionError> {
        let backend = Arc::new(SearchApi::new(&config.http_url, config.http_timeout)?);
        let translator = Arc::new(GoogleTranslator::new(
            &config.translate_source,
            &config.translate_target,
            config.http_timeout,
        )?);
        Self::with_parts(config, Arc::new(WsConnector), backend, translator)
    }

    /// Start a session with explicit transport, backend and translator.
    ///
    /// Every channel is opened immediately and its inbound frames are
    /// routed into the view.
    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn SearchBackend>,
        translator: Arc<dyn Translator>,
    ) -> Result<Self, SessionError> {
        let id = Uuid::new_v4();
        let preferences = match &config.preferences_path {
            Some(path) => PreferenceStore::load(path)?,
            None => PreferenceStore::in_memory(),
        };

        let bus = Arc::new(EventBus::default());
        let view = Arc::new(SharedView::new(Arc::clone(&bus)));
        let registry = Arc::new(ChannelRegistry::new(
            config.ws_url.clone(),
            connector,
            ReconnectPolicy::fixed(config.reconnect_delay),
        ));
        let watchdog = ResponseWatchdog::new(Arc::clone(&view), config.ws_response_timeout);
        let exports = Arc::new(ExportSession::new(
            Arc::clone(&view),
            Arc::clone(&registry),
            config.share_exports,
        ));
        let coordinator = RequestCoordinator::new(
            &config,
            Arc::clone(&view),
            Arc::clone(&registry),
            Arc::clone(&backend),
            translator,
            preferences,
            Arc::clone(&watchdog),
        );

        let cancel = CancellationToken::new();
        let router = Arc::new(InboundRouter::new(
            Arc::clone(&view),
            Arc::clone(&exports),
            watchdog,
        ));
        let routers = spawn_routers(&registry, router, cancel.clone());

        tracing::info!(
            session_id = %id,
            ws_url = %config.ws_url,
            http_url = %config.http_url,
            "Session started",
        );

        Ok(Self {
            id,
            started_at: Utc::now(),
            config,
            bus,
            view,
            registry,
            backend,
            coordinator,
            exports,
            cancel,
            routers: Mutex::new(routers),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Every observable change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn view(&self) -> &Arc<SharedView> {
        &self.view
    }

    pub fn coordinator(&self) -> &Arc<RequestCoordinator> {
        &self.coordinator
    }

    pub fn exports(&self) -> &Arc<ExportSession> {
        &self.exports
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn is_ready(&self, endpoint: Endpoint) -> bool {
        self.registry.is_ready(endpoint)
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.backend.health().await
    }

    /// Stop every channel and background task. The session is unusable
    /// afterwards.
    pub async fn shutdown(&self) {
        tracing::info!(session_id = %self.id, "Shutting down session");
        self.coordinator.cancel_pending();
        self.cancel.cancel();
        self.registry.shutdown().await;

        let routers: Vec<JoinHandle<()>> = self
            .routers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in routers {
            let _ = tokio::time::timeout(ROUTER_SHUTDOWN_TIMEOUT, handle).await;
        }
        tracing::info!(session_id = %self.id, "Session shut down complete");
    }
}
