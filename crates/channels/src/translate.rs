//! Query translation before search.
//!
//! Translation is best-effort: [`translate_or_original`] never fails and
//! hands back the input text when the translator does.

use std::time::Duration;

use async_trait::async_trait;

const GOOGLE_TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("Translation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected translation response: {0}")]
    Format(String),
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String, TranslateError>;
}

/// Translate `text`, falling back to it unchanged on any error.
/// Empty input yields an empty string without calling the translator.
pub async fn translate_or_original(translator: &dyn Translator, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    match translator.translate(text).await {
        Ok(translated) => translated,
        Err(e) => {
            tracing::warn!(error = %e, "Translation failed, using original text");
            text.to_string()
        }
    }
}

/// Leaves text untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        Ok(text.to_string())
    }
}

/// Client for the public Google translate endpoint.
pub struct GoogleTranslator {
    client: reqwest::Client,
    source: String,
    target: String,
}

impl GoogleTranslator {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TranslateError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            source: source.into(),
            target: target.into(),
        })
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        let response = self
            .client
            .get(GOOGLE_TRANSLATE_URL)
            .query(&[
                ("client", "gtx"),
                ("sl", self.source.as_str()),
                ("tl", self.target.as_str()),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        join_segments(&body)
    }
}

/// The endpoint answers `[[["<translated>", "<source>", ...], ...], ...]`;
/// the translation is the concatenation of every segment's first element.
fn join_segments(body: &serde_json::Value) -> Result<String, TranslateError> {
    let segments = body
        .get(0)
        .and_then(|s| s.as_array())
        .ok_or_else(|| TranslateError::Format(body.to_string()))?;

    Ok(segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(|t| t.as_str()))
        .collect())
}
