//! Bounded result cache for the synchronous text-search path.
//!
//! Keys are built by [`cache_key`] from the scenes' content: text
//! verbatim, images by [`image_digest`](crate::hashing::image_digest).
//! Lookups are exact-match only. When the cache is full the oldest key
//! (by last `put`) is evicted.

use std::collections::{HashMap, VecDeque};

use crate::hashing::image_digest;
use crate::types::{Query, QueryKind, ResultBatch};

/// Default number of keys retained.
pub const DEFAULT_CACHE_CAPACITY: usize = 200;

/// Build the normalized, order-preserving cache key for a set of scenes.
///
/// Fragments are joined with `:`. The key always has at least two
/// fragments, matching the first/next pair of a text search, so `["cat"]`
/// and `["cat", ""]` both produce `"cat:"`. A `:` or `\` inside a
/// fragment is backslash-escaped, so `["a:b"]` (`"a\:b:"`) and
/// `["a", "b"]` (`"a:b"`) never share a key.
pub fn cache_key(queries: &[Query]) -> String {
    let mut fragments: Vec<String> = queries.iter().map(key_fragment).collect();
    if fragments.len() < 2 {
        fragments.resize(2, String::new());
    }
    fragments.join(":")
}

fn key_fragment(query: &Query) -> String {
    match query.kind {
        QueryKind::Text | QueryKind::Sound => escape(&query.payload),
        QueryKind::Image => format!("image#{}", image_digest(&query.payload)),
    }
}

fn escape(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if c == ':' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Insertion-order bounded map of cache key to result batch.
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    entries: HashMap<String, ResultBatch>,
    order: VecDeque<String>,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` keys (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ResultBatch> {
        self.entries.get(key)
    }

    /// Store `batch` under `key`, refreshing the key's position if it was
    /// already present and evicting the oldest key when over capacity.
    pub fn put(&mut self, key: impl Into<String>, batch: ResultBatch) {
        let key = key.into();
        if self.entries.insert(key.clone(), batch).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                tracing::trace!(key = %oldest, "Evicted cached result batch");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
