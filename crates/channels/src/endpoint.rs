//! Logical backend endpoints and their WebSocket paths.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One logical streaming endpoint. Each gets its own connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Endpoint {
    Results,
    Similarity,
    Group,
    Filter,
    Pagination,
    ShareImage,
    ShareQuery,
    Alerts,
    Log,
}

impl Endpoint {
    pub const ALL: [Endpoint; 9] = [
        Endpoint::Results,
        Endpoint::Similarity,
        Endpoint::Group,
        Endpoint::Filter,
        Endpoint::Pagination,
        Endpoint::ShareImage,
        Endpoint::ShareQuery,
        Endpoint::Alerts,
        Endpoint::Log,
    ];

    /// Canonical name used in logs and events.
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Results => "results",
            Endpoint::Similarity => "similarity",
            Endpoint::Group => "group",
            Endpoint::Filter => "filter",
            Endpoint::Pagination => "pagination",
            Endpoint::ShareImage => "shareImage",
            Endpoint::ShareQuery => "shareQuery",
            Endpoint::Alerts => "alerts",
            Endpoint::Log => "log",
        }
    }

    /// Path appended to the WebSocket base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Results => "/ws",
            Endpoint::Similarity => "/ws/similarity_search",
            Endpoint::Group => "/ws/group_search",
            Endpoint::Filter => "/ws/filter_query",
            Endpoint::Pagination => "/ws/pagnition",
            Endpoint::ShareImage => "/ws/share_image",
            Endpoint::ShareQuery => "/ws/share_query",
            Endpoint::Alerts => "/ws/alerts",
            Endpoint::Log => "/ws/log",
        }
    }

    /// Full WebSocket URL under `base` (e.g. `ws://host:8006`).
    pub fn url(&self, base: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), self.path())
    }

    /// Endpoints whose pushes carry search results.
    pub fn carries_results(&self) -> bool {
        matches!(
            self,
            Endpoint::Results
                | Endpoint::Similarity
                | Endpoint::Group
                | Endpoint::Filter
                | Endpoint::Pagination
        )
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown endpoint name: {0}")]
pub struct UnknownEndpoint(pub String);

impl FromStr for Endpoint {
    type Err = UnknownEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::ALL
            .into_iter()
            .find(|e| e.name() == s)
            .ok_or_else(|| UnknownEndpoint(s.to_string()))
    }
}
