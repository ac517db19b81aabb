//! Shared fixtures for session integration tests: a scripted search
//! backend, a tagging translator and a session wired to loopback channels.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use framesync_channels::loopback::{LoopbackAcceptor, LoopbackConnector, LoopbackPeer};
use framesync_channels::{
    ApiError, ChannelState, Endpoint, HealthStatus, NoopTranslator, SearchBackend,
    TextSearchReply, TranslateError, Translator,
};
use framesync_core::types::{ResultBatch, ResultId, ResultItem};
use framesync_events::SessionEvent;
use framesync_session::{ClientConfig, Session};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Search backend double
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Text { first: String, next: String },
    Mixed { image: String, text: String },
    DoubleImage { first: String, second: String },
    Similarity(ResultId),
}

/// Records every call and answers with one result whose `video` is the
/// first argument, so tests can tell which request produced the view.
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
    /// Consumed one per call; calls beyond the list answer immediately.
    delays: Mutex<VecDeque<Duration>>,
    /// Number of upcoming calls answered with a 500.
    failures: Mutex<usize>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delays(delays: &[Duration]) -> Arc<Self> {
        let backend = Self::default();
        backend.delays.lock().unwrap().extend(delays.iter().copied());
        Arc::new(backend)
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Fail the next `count` calls with a server error.
    pub fn fail_next(&self, count: usize) {
        *self.failures.lock().unwrap() += count;
    }

    async fn answer(&self, call: BackendCall, label: &str) -> Result<ResultBatch, ApiError> {
        self.calls.lock().unwrap().push(call);
        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let fail = {
            let mut failures = self.failures.lock().unwrap();
            let fail = *failures > 0;
            *failures = failures.saturating_sub(1);
            fail
        };
        if fail {
            return Err(ApiError::ApiError {
                status: 500,
                body: "index unavailable".into(),
            });
        }
        Ok(ResultBatch::full(vec![item(label, 1)]))
    }
}

#[async_trait]
impl SearchBackend for RecordingBackend {
    async fn text_query(&self, first: &str, next: &str) -> Result<TextSearchReply, ApiError> {
        let call = BackendCall::Text {
            first: first.to_string(),
            next: next.to_string(),
        };
        let batch = self.answer(call, first).await?;
        Ok(TextSearchReply {
            batch,
            first_query: Some(first.to_string()),
            next_query: Some(next.to_string()),
        })
    }

    async fn mixed_query(&self, image: &str, text: &str) -> Result<ResultBatch, ApiError> {
        let call = BackendCall::Mixed {
            image: image.to_string(),
            text: text.to_string(),
        };
        self.answer(call, text).await
    }

    async fn double_image_query(
        &self,
        first: &str,
        second: &str,
    ) -> Result<ResultBatch, ApiError> {
        let call = BackendCall::DoubleImage {
            first: first.to_string(),
            second: second.to_string(),
        };
        self.answer(call, "double").await
    }

    async fn similarity_search(&self, id: &ResultId) -> Result<ResultBatch, ApiError> {
        self.answer(BackendCall::Similarity(id.clone()), &id.to_string())
            .await
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        Ok(HealthStatus {
            status: "healthy".into(),
            models_loaded: true,
            database_connected: true,
            active_connections: 1,
        })
    }
}

/// Prefixes its input with `"en:"`.
pub struct TaggingTranslator;

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        Ok(format!("en:{text}"))
    }
}

pub fn item(video: &str, frame_id: i64) -> ResultItem {
    ResultItem {
        id: ResultId::Int(frame_id),
        video: video.to_string(),
        frame_id,
        time_seconds: frame_id as f64 / 25.0,
        object_tags: Default::default(),
        score: None,
    }
}

// ---------------------------------------------------------------------------
// Session harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub session: Session,
    pub connector: Arc<LoopbackConnector>,
    pub acceptor: LoopbackAcceptor,
    pub backend: Arc<RecordingBackend>,
    pub events: broadcast::Receiver<SessionEvent>,
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        ws_url: "ws://loopback".into(),
        http_url: "http://loopback".into(),
        ..ClientConfig::default()
    }
}

/// Start a session on loopback channels. Must run inside a tokio runtime.
pub fn start(config: ClientConfig, backend: Arc<RecordingBackend>) -> Harness {
    start_with_translator(config, backend, Arc::new(NoopTranslator))
}

pub fn start_with_translator(
    config: ClientConfig,
    backend: Arc<RecordingBackend>,
    translator: Arc<dyn Translator>,
) -> Harness {
    let (connector, acceptor) = LoopbackConnector::new();
    let session = Session::with_parts(config, connector.clone(), backend.clone(), translator)
        .expect("session should start");
    let events = session.subscribe();
    Harness {
        session,
        connector,
        acceptor,
        backend,
        events,
    }
}

impl Harness {
    /// Accept the server side of `endpoint` and wait until the client
    /// reports the channel open.
    pub async fn peer(&mut self, endpoint: Endpoint) -> LoopbackPeer {
        let peer = self
            .acceptor
            .accept_url(endpoint.path())
            .await
            .expect("connector alive");
        self.wait_state(endpoint, ChannelState::Open).await;
        peer
    }

    pub async fn wait_state(&self, endpoint: Endpoint, state: ChannelState) {
        let mut states = self.session.registry().get(endpoint).state_changes();
        states
            .wait_for(|s| *s == state)
            .await
            .expect("state sender alive");
    }

    /// Events published since the last drain.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}

/// Let spawned tasks process whatever is ready.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn error_notices(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Notice(n) if n.level == framesync_events::NoticeLevel::Error => {
                Some(n.message.clone())
            }
            _ => None,
        })
        .collect()
}
