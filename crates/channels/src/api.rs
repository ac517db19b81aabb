//! HTTP client for the retrieval backend's request/response endpoints.
//!
//! Text, mixed, double-image and similarity searches can be served over
//! plain HTTP. [`SearchBackend`] is the seam the request coordinator
//! talks to; [`SearchApi`] implements it with [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use framesync_core::types::{ResultBatch, ResultId, ResultItem};
use serde::{Deserialize, Serialize};

use crate::messages::{SimilarityRequest, TextQueryResponse, WireHit};

/// Outcome of an HTTP text search.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSearchReply {
    pub batch: ResultBatch,
    /// The queries as the backend ran them, when it echoed them back.
    pub first_query: Option<String>,
    pub next_query: Option<String>,
}

/// Backend liveness, from `GET /health`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub models_loaded: bool,
    #[serde(default)]
    pub database_connected: bool,
    #[serde(default)]
    pub active_connections: u32,
}

/// Request/response search operations.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Temporal text search with a first and an optional follow-up scene.
    async fn text_query(&self, first: &str, next: &str) -> Result<TextSearchReply, ApiError>;

    /// One image scene combined with one text scene.
    async fn mixed_query(&self, image: &str, text: &str) -> Result<ResultBatch, ApiError>;

    /// Two image scenes.
    async fn double_image_query(&self, first: &str, second: &str) -> Result<ResultBatch, ApiError>;

    /// Frames similar to an existing result.
    async fn similarity_search(&self, id: &ResultId) -> Result<ResultBatch, ApiError>;

    /// Backend liveness.
    async fn health(&self) -> Result<HealthStatus, ApiError>;
}

/// Errors from the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Search API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

#[derive(Debug, Serialize)]
struct TextQueryBody<'a> {
    #[serde(rename = "First_query")]
    first_query: &'a str,
    #[serde(rename = "Next_query")]
    next_query: &'a str,
}

#[derive(Debug, Serialize)]
struct MixedQueryBody<'a> {
    image: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct DoubleImageBody<'a> {
    #[serde(rename = "firstImage")]
    first_image: &'a str,
    #[serde(rename = "secondImage")]
    second_image: &'a str,
}

#[derive(Debug, Deserialize)]
struct HitsResponse {
    #[serde(default)]
    kq: Option<Vec<WireHit>>,
}

/// HTTP client for one backend.
pub struct SearchApi {
    client: reqwest::Client,
    api_url: String,
}

impl SearchApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://localhost:8006`.
    /// * `timeout` - Per-request timeout.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    async fn post_for_hits<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ResultBatch, ApiError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_url, path))
            .json(body)
            .send()
            .await?;

        let hits: HitsResponse = Self::parse_response(response).await?;
        Ok(hits_to_batch(hits.kq))
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SearchBackend for SearchApi {
    async fn text_query(&self, first: &str, next: &str) -> Result<TextSearchReply, ApiError> {
        // The backend reads the raw body, so the content type is irrelevant.
        let response = self
            .client
            .post(format!("{}/TextQuery", self.api_url))
            .json(&TextQueryBody {
                first_query: first,
                next_query: next,
            })
            .send()
            .await?;

        let reply: TextQueryResponse = Self::parse_response(response).await?;
        Ok(TextSearchReply {
            batch: hits_to_batch(reply.kq),
            first_query: reply.fquery,
            next_query: reply.nquery,
        })
    }

    async fn mixed_query(&self, image: &str, text: &str) -> Result<ResultBatch, ApiError> {
        self.post_for_hits("/mixed_query", &MixedQueryBody { image, text })
            .await
    }

    async fn double_image_query(&self, first: &str, second: &str) -> Result<ResultBatch, ApiError> {
        self.post_for_hits(
            "/double_image_query",
            &DoubleImageBody {
                first_image: first,
                second_image: second,
            },
        )
        .await
    }

    async fn similarity_search(&self, id: &ResultId) -> Result<ResultBatch, ApiError> {
        self.post_for_hits("/similarity_search", &SimilarityRequest { vector: id.clone() })
            .await
    }

    async fn health(&self) -> Result<HealthStatus, ApiError> {
        let response = self
            .client
            .get(format!("{}/health", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

/// A `null` or missing hit list is an empty result.
fn hits_to_batch(hits: Option<Vec<WireHit>>) -> ResultBatch {
    ResultBatch::full(
        hits.unwrap_or_default()
            .into_iter()
            .map(ResultItem::from)
            .collect(),
    )
}
