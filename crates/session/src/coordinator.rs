//! Outbound search dispatch.
//!
//! [`RequestCoordinator`] turns composed scenes into exactly one request
//! per debounced burst. Text-only searches go over HTTP and are cached;
//! searches with images go over HTTP without caching; anything the HTTP
//! endpoints cannot express goes over the results channel. A newer HTTP
//! dispatch cancels the older one, and a cancelled response is dropped
//! without touching the results.
//!
//! WebSocket replies carry no correlation id, so replies are applied in
//! the order they arrive, even when an older dispatch answers last.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use framesync_channels::messages::{
    AlertMessage, FilterRequest, GroupRequest, MultiQuery, PaginationQuery, SharedQuery,
    SimilarityRequest,
};
use framesync_channels::{
    translate_or_original, ChannelRegistry, Endpoint, SearchBackend, Translator,
};
use framesync_core::cache::{cache_key, ResultCache};
use framesync_core::preferences::{PreferenceStore, TRANSLATE_ENABLED};
use framesync_core::types::{Query, QueryKind, ResultBatch, ResultId, TaskMode};
use framesync_events::{NoticeLevel, SessionEvent};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::debounce::{ActionPhase, Debouncer};
use crate::error::SessionError;
use crate::view::SharedView;
use crate::watchdog::ResponseWatchdog;

/// Where a set of scenes is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchRoute {
    /// `POST /TextQuery`, cached.
    Text,
    /// `POST /mixed_query` or `POST /double_image_query`, not cached.
    Image,
    /// `multi_query` on the results channel.
    Stream,
}

impl SearchRoute {
    /// The HTTP endpoints take at most two scenes and no sound.
    pub fn classify(queries: &[Query]) -> Self {
        let has_sound = queries.iter().any(|q| q.kind == QueryKind::Sound);
        if queries.len() > 2 || has_sound {
            return SearchRoute::Stream;
        }
        if queries.iter().any(Query::is_image) {
            SearchRoute::Image
        } else {
            SearchRoute::Text
        }
    }
}

pub struct RequestCoordinator {
    model: String,
    pagination_mode: String,
    view: Arc<SharedView>,
    registry: Arc<ChannelRegistry>,
    backend: Arc<dyn SearchBackend>,
    translator: Arc<dyn Translator>,
    cache: Mutex<ResultCache>,
    preferences: Mutex<PreferenceStore>,
    watchdog: Arc<ResponseWatchdog>,
    search: Debouncer,
    similarity: Debouncer,
    /// Highest page requested for the current paginated search; `None`
    /// when no paginated search is active.
    requested_page: Mutex<Option<u32>>,
}

impl RequestCoordinator {
    pub fn new(
        config: &ClientConfig,
        view: Arc<SharedView>,
        registry: Arc<ChannelRegistry>,
        backend: Arc<dyn SearchBackend>,
        translator: Arc<dyn Translator>,
        preferences: PreferenceStore,
        watchdog: Arc<ResponseWatchdog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            model: config.model.clone(),
            pagination_mode: config.pagination_mode.clone(),
            view,
            registry,
            backend,
            translator,
            cache: Mutex::new(ResultCache::new(config.cache_capacity)),
            preferences: Mutex::new(preferences),
            watchdog,
            search: Debouncer::new(config.debounce),
            similarity: Debouncer::new(config.debounce),
            requested_page: Mutex::new(None),
        })
    }

    // ---- searches ----

    /// Debounced search over `queries`. Returns the route the burst will
    /// take if it is the last one.
    pub fn submit(self: &Arc<Self>, queries: Vec<Query>) -> SearchRoute {
        let route = SearchRoute::classify(&queries);
        let coordinator = Arc::clone(self);
        self.search.schedule(move |token| async move {
            coordinator.record_history(&queries);
            match route {
                SearchRoute::Text => coordinator.run_text_search(queries, token).await,
                SearchRoute::Image => coordinator.run_image_search(queries, token).await,
                SearchRoute::Stream => {
                    let message = MultiQuery::new(&coordinator.model, &queries);
                    // Reported to the user by `send_ws`.
                    let _ = coordinator.send_ws(Endpoint::Results, &message);
                }
            }
        });
        route
    }

    pub fn search_phase(&self) -> ActionPhase {
        self.search.phase()
    }

    /// Start a paginated search. The view is cleared and pages are
    /// appended as they arrive.
    pub fn submit_paginated(&self, queries: &[Query]) -> Result<(), SessionError> {
        self.view.reset_search();
        *self.requested_page() = None;
        self.record_history(queries);

        let message = MultiQuery::paginated(&self.model, &self.pagination_mode, queries);
        self.send_ws(Endpoint::Pagination, &message)?;
        // The search itself answers with page 0.
        *self.requested_page() = Some(0);
        Ok(())
    }

    /// Ask for the page after the last one applied. Returns the page
    /// requested, or `None` when there is no paginated search or that
    /// page has already been asked for.
    pub fn request_next_page(&self) -> Result<Option<u32>, SessionError> {
        let page = self.view.next_page();
        match *self.requested_page() {
            None => return Ok(None),
            Some(requested) if requested >= page => {
                tracing::debug!(page, requested, "Page already requested");
                return Ok(None);
            }
            Some(_) => {}
        }

        let message = PaginationQuery {
            model: self.model.clone(),
            mode: self.pagination_mode.clone(),
            page,
        };
        self.send_ws(Endpoint::Pagination, &message)?;
        *self.requested_page() = Some(page);
        Ok(Some(page))
    }

    /// Frames similar to a result, over the similarity channel.
    pub fn similarity(&self, id: ResultId) -> Result<(), SessionError> {
        self.send_ws(Endpoint::Similarity, &SimilarityRequest { vector: id })
    }

    /// Debounced similarity search over HTTP.
    pub fn similarity_http(self: &Arc<Self>, id: ResultId) {
        let coordinator = Arc::clone(self);
        self.similarity.schedule(move |token| async move {
            let _in_flight = coordinator.watchdog.http_request();
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(%id, "Stale similarity response discarded");
                    return;
                }
                result = coordinator.backend.similarity_search(&id) => result,
            };
            coordinator.apply_http_batch(result.map_err(SessionError::from));
        });
    }

    /// Frames from the same group as a result.
    pub fn group_search(&self, id: ResultId) -> Result<(), SessionError> {
        self.send_ws(Endpoint::Group, &GroupRequest { image_id: id })
    }

    /// Backend id of row `index` in the unfiltered result list, for the
    /// similarity and group searches.
    pub fn result_id_at(&self, index: usize) -> Result<ResultId, SessionError> {
        self.view
            .read(|state| state.result_id_at(index))
            .ok_or(SessionError::NoSuchResult(index))
    }

    pub fn filter(&self, request: &FilterRequest) -> Result<(), SessionError> {
        self.send_ws(Endpoint::Filter, request)
    }

    // ---- collaboration ----

    /// Send a query to peers. Blank text is ignored (`Ok(false)`).
    pub fn share_query(&self, text: &str) -> Result<bool, SessionError> {
        let query = text.trim();
        if query.is_empty() {
            return Ok(false);
        }
        self.send_plain(
            Endpoint::ShareQuery,
            &SharedQuery {
                query: query.to_string(),
            },
        )?;
        Ok(true)
    }

    pub fn send_alert(&self, message: &str) -> Result<(), SessionError> {
        self.send_plain(
            Endpoint::Alerts,
            &AlertMessage {
                message: message.to_string(),
            },
        )
    }

    // ---- preferences / modes ----

    pub fn translate_enabled(&self) -> bool {
        self.preferences().get(TRANSLATE_ENABLED)
    }

    /// Persisted immediately.
    pub fn set_translate(&self, enabled: bool) -> Result<(), SessionError> {
        self.preferences().set(TRANSLATE_ENABLED, enabled)?;
        tracing::info!(enabled, "Translation toggled");
        Ok(())
    }

    pub fn set_task_mode(&self, mode: TaskMode) {
        self.view.set_task_mode(mode);
    }

    pub fn set_quick_search(&self, enabled: bool) {
        *self.requested_page() = None;
        self.view.set_quick_search(enabled);
    }

    pub fn reset_search(&self) {
        *self.requested_page() = None;
        self.view.reset_search();
    }

    /// Drop pending searches and cancel running ones.
    pub fn cancel_pending(&self) {
        self.search.cancel();
        self.similarity.cancel();
    }

    // ---- private helpers ----

    async fn run_text_search(&self, queries: Vec<Query>, token: CancellationToken) {
        let key = cache_key(&queries);
        let cached = self.cache().get(&key).cloned();
        if let Some(batch) = cached {
            tracing::debug!(%key, "Search served from cache");
            self.view.replace_results(batch);
            return;
        }

        let first = queries.first().map(|q| q.payload.clone()).unwrap_or_default();
        let next = queries.get(1).map(|q| q.payload.clone()).unwrap_or_default();
        let translate = self.translate_enabled();

        let _in_flight = self.watchdog.http_request();
        let request = async {
            let (first, next) = if translate {
                let first = translate_or_original(self.translator.as_ref(), &first).await;
                let next = translate_or_original(self.translator.as_ref(), &next).await;
                (first, next)
            } else {
                (first, next)
            };
            self.backend.text_query(&first, &next).await
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(%key, "Stale text search discarded");
                return;
            }
            result = request => result,
        };

        match result {
            Ok(reply) => {
                self.cache().put(key, reply.batch.clone());
                self.view.replace_results(reply.batch);
                if reply.first_query.is_some() || reply.next_query.is_some() {
                    self.view.bus().publish(SessionEvent::QueriesEchoed {
                        first: reply.first_query.unwrap_or_default(),
                        next: reply.next_query.unwrap_or_default(),
                    });
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Text search failed");
                self.view.notify(NoticeLevel::Error, e.to_string());
            }
        }
    }

    async fn run_image_search(&self, queries: Vec<Query>, token: CancellationToken) {
        let images: Vec<&str> = queries
            .iter()
            .filter(|q| q.is_image())
            .map(Query::transport_content)
            .collect();
        let text = queries
            .iter()
            .filter(|q| !q.is_image())
            .map(|q| q.payload.as_str())
            .find(|t| !t.is_empty())
            .unwrap_or_default();

        let _in_flight = self.watchdog.http_request();
        let request = async {
            match images.as_slice() {
                [first, second, ..] => self.backend.double_image_query(first, second).await,
                [image] => self.backend.mixed_query(image, text).await,
                [] => Ok(ResultBatch::default()),
            }
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("Stale image search discarded");
                return;
            }
            result = request => result,
        };
        self.apply_http_batch(result.map_err(SessionError::from));
    }

    fn apply_http_batch(&self, result: Result<ResultBatch, SessionError>) {
        match result {
            Ok(batch) => {
                self.view.replace_results(batch);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Search request failed");
                self.view.notify(NoticeLevel::Error, e.to_string());
            }
        }
    }

    /// Send a search on a results-carrying channel and wait for its push.
    fn send_ws<T: Serialize>(&self, endpoint: Endpoint, message: &T) -> Result<(), SessionError> {
        self.watchdog.arm(endpoint);
        self.send_plain(endpoint, message)
            .inspect_err(|_| self.watchdog.resolve(endpoint))
    }

    /// Fire-and-forget send. Failures are reported to the user and
    /// returned.
    fn send_plain<T: Serialize>(
        &self,
        endpoint: Endpoint,
        message: &T,
    ) -> Result<(), SessionError> {
        self.registry.send_json(endpoint, message).map_err(|e| {
            tracing::warn!(%endpoint, error = %e, "Send failed");
            self.view.notify(NoticeLevel::Error, e.to_string());
            SessionError::from(e)
        })
    }

    fn record_history(&self, queries: &[Query]) {
        for query in queries.iter().filter(|q| q.kind == QueryKind::Text) {
            self.view.record_local_query(&query.payload);
        }
    }

    fn cache(&self) -> MutexGuard<'_, ResultCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn preferences(&self) -> MutexGuard<'_, PreferenceStore> {
        self.preferences.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn requested_page(&self) -> MutexGuard<'_, Option<u32>> {
        self.requested_page.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
