//! Local query history and the list of queries shared by peers.

use chrono::Utc;
use serde::Serialize;

use crate::types::Timestamp;

/// Upper bound on each list so a long session does not grow unbounded.
const MAX_HISTORY_ENTRIES: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub query: String,
    pub at: Timestamp,
}

/// Two most-recent-first lists: queries this user ran (unique) and queries
/// received from peers (kept as received).
#[derive(Debug, Clone, Default)]
pub struct QueryHistory {
    local: Vec<HistoryEntry>,
    shared: Vec<HistoryEntry>,
}

impl QueryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a locally submitted query. Blank queries and queries already
    /// in the history (after trimming) are ignored. Returns `true` if added.
    pub fn record_local(&mut self, query: &str) -> bool {
        let trimmed = query.trim();
        if trimmed.is_empty() || self.local.iter().any(|e| e.query == trimmed) {
            return false;
        }
        push_front(&mut self.local, trimmed);
        true
    }

    /// Record a query pushed by a peer.
    pub fn record_shared(&mut self, query: &str) {
        push_front(&mut self.shared, query);
    }

    pub fn local(&self) -> &[HistoryEntry] {
        &self.local
    }

    pub fn shared(&self) -> &[HistoryEntry] {
        &self.shared
    }

    pub fn clear_local(&mut self) {
        self.local.clear();
    }

    pub fn clear_shared(&mut self) {
        self.shared.clear();
    }
}

fn push_front(list: &mut Vec<HistoryEntry>, query: &str) {
    list.insert(
        0,
        HistoryEntry {
            query: query.to_string(),
            at: Utc::now(),
        },
    );
    list.truncate(MAX_HISTORY_ENTRIES);
}
