//! Domain types shared by every framesync crate.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Keyframe number inside a video, as reported by the backend.
pub type FrameId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Input modality of a single scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Text,
    Image,
    Sound,
}

/// How a scene participates in a multi-scene search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Temporal,
    Expansion,
}

/// Immutable snapshot of one scene, taken when a search is dispatched.
///
/// For [`QueryKind::Image`] the payload is either a data-URL
/// (`data:image/png;base64,...`) or the bare base64 transport form. Use
/// [`Query::transport_content`] before putting it on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub kind: QueryKind,
    pub payload: String,
    #[serde(default)]
    pub mode: QueryMode,
}

impl Query {
    pub fn text(payload: impl Into<String>) -> Self {
        Self::new(QueryKind::Text, payload)
    }

    pub fn image(payload: impl Into<String>) -> Self {
        Self::new(QueryKind::Image, payload)
    }

    pub fn sound(payload: impl Into<String>) -> Self {
        Self::new(QueryKind::Sound, payload)
    }

    fn new(kind: QueryKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            mode: QueryMode::default(),
        }
    }

    /// Builder-style override of the composition mode.
    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn is_image(&self) -> bool {
        self.kind == QueryKind::Image
    }

    /// `true` when the scene carries no content at all.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload in the form the backend expects.
    ///
    /// Image data-URLs are stripped down to their base64 body; every other
    /// payload is returned verbatim.
    pub fn transport_content(&self) -> &str {
        match self.kind {
            QueryKind::Image => strip_data_url(&self.payload),
            QueryKind::Text | QueryKind::Sound => &self.payload,
        }
    }
}

/// Return the base64 body of a data-URL, or the input when it has no
/// `data:` header.
pub fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:") {
        payload
            .split_once(',')
            .map(|(_, body)| body)
            .unwrap_or_default()
    } else {
        payload
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Opaque backend identifier of a result row.
///
/// Only this value is accepted by similarity and group searches. The
/// backend emits either integers or strings depending on the collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultId {
    Int(i64),
    Text(String),
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultId::Int(id) => write!(f, "{id}"),
            ResultId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for ResultId {
    fn from(id: i64) -> Self {
        ResultId::Int(id)
    }
}

impl From<&str> for ResultId {
    fn from(id: &str) -> Self {
        ResultId::Text(id.to_string())
    }
}

/// One keyframe returned by a search.
///
/// `(video, frame_id)` is the display and export identity; `id` is the
/// handle for follow-up searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub id: ResultId,
    pub video: String,
    pub frame_id: FrameId,
    pub time_seconds: f64,
    #[serde(default)]
    pub object_tags: BTreeSet<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl ResultItem {
    /// Human-readable `"<video>-<seconds>"` label, seconds rounded to two
    /// decimals with trailing zeros dropped.
    pub fn frame_info(&self) -> String {
        let rounded = (self.time_seconds * 100.0).round() / 100.0;
        format!("{}-{}", self.video, rounded)
    }

    /// Whether any of this item's object tags is in `tags`.
    pub fn has_any_tag(&self, tags: &BTreeSet<String>) -> bool {
        self.object_tags.iter().any(|tag| tags.contains(tag))
    }
}

/// Ordered result sequence, tagged with its page when it came from the
/// pagination channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultBatch {
    pub items: Vec<ResultItem>,
    #[serde(default)]
    pub page: Option<u32>,
}

impl ResultBatch {
    /// Untagged batch that replaces whatever is on screen.
    pub fn full(items: Vec<ResultItem>) -> Self {
        Self { items, page: None }
    }

    /// Batch belonging to pagination page `page`.
    pub fn paged(items: Vec<ResultItem>, page: u32) -> Self {
        Self {
            items,
            page: Some(page),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultItem> {
        self.items.iter()
    }
}

// ---------------------------------------------------------------------------
// Export / annotation
// ---------------------------------------------------------------------------

/// Where an export entry came from. Remote entries are never re-broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

/// One keyframe picked for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub frame_id: FrameId,
    /// `"<dir>/<stem>"` derived from `src`; see [`video_frame_key`].
    pub video_frame_key: String,
    pub src: String,
    pub frame_info: String,
    pub origin: Origin,
}

impl ExportEntry {
    pub fn new(
        frame_id: FrameId,
        src: impl Into<String>,
        frame_info: impl Into<String>,
        origin: Origin,
    ) -> Self {
        let src = src.into();
        Self {
            frame_id,
            video_frame_key: video_frame_key(&src),
            src,
            frame_info: frame_info.into(),
            origin,
        }
    }

    /// Identity used for de-duplication.
    pub fn identity(&self) -> (FrameId, &str) {
        (self.frame_id, &self.video_frame_key)
    }
}

/// Derive the `"<second-to-last segment>/<last segment without extension>"`
/// key from an image path or URL.
///
/// A path with a single segment yields `"/<stem>"`.
pub fn video_frame_key(src: &str) -> String {
    let mut segments = src.rsplit('/');
    let file = segments.next().unwrap_or_default();
    let dir = segments.next().unwrap_or_default();
    let stem = file.split('.').next().unwrap_or_default();
    format!("{dir}/{stem}")
}

/// Downstream task the export selection is prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    /// Known-item search: a ranked list of frames.
    #[default]
    Kis,
    /// Video question answering: frames plus a free-text answer each.
    Vqa,
}

impl TaskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Kis => "kis",
            TaskMode::Vqa => "vqa",
        }
    }
}
