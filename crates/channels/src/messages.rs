//! Wire messages exchanged with the retrieval backend.
//!
//! Outbound requests are plain `Serialize` structs; inbound pushes are
//! parsed per endpoint with the `parse_*` functions. Field names follow
//! the backend's JSON exactly, hence the occasional camelCase rename.

use std::collections::BTreeMap;

use framesync_core::types::{
    FrameId, Query, QueryKind, QueryMode, ResultBatch, ResultId, ResultItem,
};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Outbound: searches
// ---------------------------------------------------------------------------

/// One scene inside a [`MultiQuery`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneQuery {
    #[serde(rename = "type")]
    pub kind: QueryKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<QueryMode>,
}

impl SceneQuery {
    /// Scene with its per-scene composition mode.
    pub fn with_mode(query: &Query) -> Self {
        Self {
            kind: query.kind,
            content: query.transport_content().to_string(),
            mode: Some(query.mode),
        }
    }

    /// Scene without a mode; the paginated search carries one global mode.
    pub fn without_mode(query: &Query) -> Self {
        Self {
            kind: query.kind,
            content: query.transport_content().to_string(),
            mode: None,
        }
    }
}

/// Multi-scene search on the results or pagination endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "multi_query")]
pub struct MultiQuery {
    pub model: String,
    /// Global mode, only sent for paginated searches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub queries: Vec<SceneQuery>,
}

impl MultiQuery {
    /// Scenes with no content are left out of the request.
    pub fn new(model: impl Into<String>, queries: &[Query]) -> Self {
        Self {
            model: model.into(),
            mode: None,
            queries: non_empty(queries).map(SceneQuery::with_mode).collect(),
        }
    }

    pub fn paginated(
        model: impl Into<String>,
        mode: impl Into<String>,
        queries: &[Query],
    ) -> Self {
        Self {
            model: model.into(),
            mode: Some(mode.into()),
            queries: non_empty(queries).map(SceneQuery::without_mode).collect(),
        }
    }
}

fn non_empty(queries: &[Query]) -> impl Iterator<Item = &Query> {
    queries.iter().filter(|q| !q.is_empty())
}

/// Request for one more page of the current paginated search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "pagination_query")]
pub struct PaginationQuery {
    pub model: String,
    pub mode: String,
    pub page: u32,
}

/// Similarity search by result id, over WebSocket or HTTP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityRequest {
    pub vector: ResultId,
}

/// Group search by result id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRequest {
    #[serde(rename = "imageId")]
    pub image_id: ResultId,
}

/// Object-count constraint inside a filter search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectFilter {
    pub name: String,
    pub number: String,
}

/// A typed query as embedded in a [`FilterRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedContent {
    #[serde(rename = "type")]
    pub kind: QueryKind,
    pub content: String,
}

impl From<&Query> for TypedContent {
    fn from(query: &Query) -> Self {
        Self {
            kind: query.kind,
            content: query.transport_content().to_string(),
        }
    }
}

/// Filtered search. The per-scene vectors are index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterRequest {
    pub ocrtext: Vec<String>,
    pub asmtext: Vec<String>,
    pub filters: Vec<Vec<ObjectFilter>>,
    #[serde(rename = "textQueries")]
    pub text_queries: Vec<TypedContent>,
    #[serde(rename = "imageQueries")]
    pub image_queries: Vec<TypedContent>,
}

impl FilterRequest {
    /// Add one scene. Image queries go to `image_queries`, non-empty
    /// text-like queries to `text_queries`.
    pub fn push_scene(
        &mut self,
        query: &Query,
        ocr: impl Into<String>,
        asr: impl Into<String>,
        filters: Vec<ObjectFilter>,
    ) {
        if query.is_image() {
            self.image_queries.push(query.into());
        } else if !query.is_empty() {
            self.text_queries.push(query.into());
        }
        self.ocrtext.push(ocr.into());
        self.asmtext.push(asr.into());
        self.filters.push(filters);
    }
}

// ---------------------------------------------------------------------------
// Outbound / inbound: collaboration
// ---------------------------------------------------------------------------

/// Messages on the shared-image endpoint, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShareMessage {
    ImageShare {
        #[serde(rename = "frameId")]
        frame_id: FrameId,
        src: String,
        #[serde(rename = "frameInfo")]
        frame_info: String,
    },
    VqaInputUpdate {
        #[serde(rename = "frameId")]
        frame_id: FrameId,
        #[serde(rename = "vqaInput")]
        vqa_input: String,
    },
}

/// Shared query text, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "shared_query")]
pub struct SharedQuery {
    pub query: String,
}

/// Team-wide alert, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "alert")]
pub struct AlertMessage {
    pub message: String,
}

/// Audit record sent to the log endpoint when a file is exported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportLog {
    pub file_name: String,
    pub task_type: String,
    pub top_images: Vec<String>,
}

/// Acknowledgement from the log endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogReply {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Inbound: results
// ---------------------------------------------------------------------------

/// A results push. `kq` is absent on error replies and may be `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPush {
    #[serde(default)]
    pub kq: Option<Vec<WireHit>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

impl SearchPush {
    /// Hits converted to a batch, or `None` when the push carried none.
    pub fn into_batch(self) -> Option<ResultBatch> {
        let page = self.page;
        let items = self.kq?.into_iter().map(ResultItem::from).collect();
        Some(ResultBatch { items, page })
    }
}

/// One hit as the backend sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct WireHit {
    pub id: ResultId,
    #[serde(default, alias = "distance")]
    pub score: Option<f64>,
    pub entity: WireEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireEntity {
    pub video: String,
    #[serde(deserialize_with = "frame_id_from_number_or_string")]
    pub frame_id: FrameId,
    #[serde(default)]
    pub time: f64,
    /// Object tag -> detection payload. Only the keys are used.
    #[serde(default)]
    pub object: Option<BTreeMap<String, serde_json::Value>>,
}

impl From<WireHit> for ResultItem {
    fn from(hit: WireHit) -> Self {
        ResultItem {
            id: hit.id,
            video: hit.entity.video,
            frame_id: hit.entity.frame_id,
            time_seconds: hit.entity.time,
            object_tags: hit.entity.object.unwrap_or_default().into_keys().collect(),
            score: hit.score,
        }
    }
}

fn frame_id_from_number_or_string<'de, D>(deserializer: D) -> Result<FrameId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Float(f) if f.fract() == 0.0 => Ok(f as i64),
        Raw::Float(f) => Err(serde::de::Error::custom(format!("non-integral frame_id {f}"))),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid frame_id {s:?}"))),
    }
}

/// Reply body of the HTTP text search.
#[derive(Debug, Clone, Deserialize)]
pub struct TextQueryResponse {
    #[serde(default)]
    pub kq: Option<Vec<WireHit>>,
    /// First query as the backend ran it (after any translation).
    #[serde(default)]
    pub fquery: Option<String>,
    #[serde(default)]
    pub nquery: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a push from any result-carrying endpoint.
pub fn parse_search_push(text: &str) -> Result<SearchPush, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn parse_share_message(text: &str) -> Result<ShareMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn parse_shared_query(text: &str) -> Result<SharedQuery, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn parse_alert(text: &str) -> Result<AlertMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn parse_log_reply(text: &str) -> Result<LogReply, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_query_shape() {
        let queries = [
            Query::text("a red car"),
            Query::image("data:image/png;base64,QUJD").with_mode(QueryMode::Expansion),
        ];
        let json = serde_json::to_value(MultiQuery::new("clip", &queries)).unwrap();
        assert_eq!(json["type"], "multi_query");
        assert_eq!(json["model"], "clip");
        assert!(json.get("mode").is_none());
        assert_eq!(json["queries"][0]["type"], "text");
        assert_eq!(json["queries"][0]["mode"], "temporal");
        assert_eq!(json["queries"][1]["content"], "QUJD");
        assert_eq!(json["queries"][1]["mode"], "expansion");
    }

    #[test]
    fn paginated_multi_query_carries_global_mode() {
        let query = MultiQuery::paginated("clip", "search", &[Query::text("x")]);
        let json = serde_json::to_value(query).unwrap();
        assert_eq!(json["mode"], "search");
        assert!(json["queries"][0].get("mode").is_none());
    }

    #[test]
    fn empty_scenes_are_not_sent() {
        let queries = [Query::text("cat"), Query::text(""), Query::sound("engine")];

        let plain = MultiQuery::new("clip", &queries);
        assert_eq!(plain.queries.len(), 2);
        assert_eq!(plain.queries[1].content, "engine");

        let paged = MultiQuery::paginated("clip", "search", &queries);
        assert_eq!(paged.queries.len(), 2);
        assert_eq!(paged.queries[0].content, "cat");
    }

    #[test]
    fn pagination_query_shape() {
        let json = serde_json::to_value(PaginationQuery {
            model: "clip".into(),
            mode: "search".into(),
            page: 2,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type":"pagination_query","model":"clip","mode":"search","page":2})
        );
    }

    #[test]
    fn similarity_and_group_use_backend_field_names() {
        let sim = serde_json::to_string(&SimilarityRequest { vector: 42.into() }).unwrap();
        assert_eq!(sim, r#"{"vector":42}"#);
        let group = serde_json::to_string(&GroupRequest { image_id: "abc".into() }).unwrap();
        assert_eq!(group, r#"{"imageId":"abc"}"#);
    }

    #[test]
    fn filter_request_splits_scenes_by_kind() {
        let mut req = FilterRequest::default();
        let person = ObjectFilter {
            name: "person".into(),
            number: "2".into(),
        };
        req.push_scene(&Query::text("boat"), "sign", "", vec![person]);
        req.push_scene(&Query::image("data:image/jpeg;base64,Zm9v"), "", "hello", Vec::new());
        req.push_scene(&Query::text(""), "", "", Vec::new());

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["textQueries"].as_array().unwrap().len(), 1);
        assert_eq!(json["imageQueries"][0]["content"], "Zm9v");
        assert_eq!(json["ocrtext"], serde_json::json!(["sign", "", ""]));
        assert_eq!(json["filters"][0][0]["name"], "person");
        assert_eq!(json["filters"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn share_messages_use_camel_case_fields() {
        let msg = ShareMessage::ImageShare {
            frame_id: 42,
            src: "/k/L01_V001/0042.jpg".into(),
            frame_info: "L01_V001-12.5".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "image_share");
        assert_eq!(json["frameId"], 42);
        assert_eq!(json["frameInfo"], "L01_V001-12.5");

        let text = r#"{"type":"vqa_input_update","frameId":7,"vqaInput":"blue"}"#;
        let parsed = parse_share_message(text).unwrap();
        assert_eq!(
            parsed,
            ShareMessage::VqaInputUpdate {
                frame_id: 7,
                vqa_input: "blue".into()
            }
        );
    }

    #[test]
    fn unknown_share_type_is_an_error() {
        assert!(parse_share_message(r#"{"type":"cursor_move","x":1}"#).is_err());
    }

    #[test]
    fn parse_results_push() {
        let json = r#"{"kq":[
            {"id":1,"distance":0.12,"entity":{"video":"L01_V001","frame_id":42,"time":12.345,
                "object":{"car":[1],"person":[2]}}},
            {"id":"x7","entity":{"video":"L02_V003","frame_id":"0099","time":3.0}}
        ]}"#;
        let batch = parse_search_push(json).unwrap().into_batch().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.page, None);

        let first = &batch.items[0];
        assert_eq!(first.id, ResultId::Int(1));
        assert_eq!(first.score, Some(0.12));
        assert_eq!(first.frame_id, 42);
        assert!(first.object_tags.contains("car"));

        let second = &batch.items[1];
        assert_eq!(second.id, ResultId::Text("x7".into()));
        assert_eq!(second.frame_id, 99);
        assert!(second.object_tags.is_empty());
    }

    #[test]
    fn parse_paged_push() {
        let push = parse_search_push(r#"{"kq":[],"page":3}"#).unwrap();
        assert_eq!(push.page, Some(3));
        assert!(push.into_batch().unwrap().is_empty());
    }

    #[test]
    fn error_push_has_no_batch() {
        let push = parse_search_push(r#"{"error":"index offline"}"#).unwrap();
        assert_eq!(push.error.as_deref(), Some("index offline"));
        assert!(push.into_batch().is_none());

        let null_kq = parse_search_push(r#"{"kq":null}"#).unwrap();
        assert!(null_kq.into_batch().is_none());
    }

    #[test]
    fn bad_frame_id_is_rejected() {
        let json = r#"{"kq":[{"id":1,"entity":{"video":"v","frame_id":"abc","time":0}}]}"#;
        assert!(parse_search_push(json).is_err());
    }

    #[test]
    fn parse_collaboration_messages() {
        assert_eq!(
            parse_shared_query(r#"{"type":"shared_query","query":"two dogs"}"#).unwrap().query,
            "two dogs"
        );
        assert_eq!(
            parse_alert(r#"{"type":"alert","message":"submit now"}"#).unwrap().message,
            "submit now"
        );
        assert_eq!(parse_log_reply(r#"{"message":"ok"}"#).unwrap().message, "ok");
        assert!(parse_alert("not json").is_err());
    }

    #[test]
    fn export_log_shape() {
        let json = serde_json::to_value(ExportLog {
            file_name: "query-1-kis.csv".into(),
            task_type: "kis".into(),
            top_images: vec!["L01_V001/0042".into()],
        })
        .unwrap();
        assert_eq!(json["file_name"], "query-1-kis.csv");
        assert_eq!(json["top_images"][0], "L01_V001/0042");
    }
}
