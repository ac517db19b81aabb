//! Session view state and its reconciliation rules.
//!
//! [`ViewState`] is a plain synchronous value. Every writer, local UI
//! action or remote push alike, mutates it through the `apply_*` methods
//! so the same invariants hold regardless of where a change came from:
//!
//! - a full replace discards the previous batch and the pagination cursor;
//! - a page is appended only if it is exactly the next expected page;
//! - the object filter narrows the visible projection and never touches
//!   the underlying batch;
//! - the export set never holds two entries with the same identity;
//! - annotations are last-writer-wins.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::error::CoreError;
use crate::export::{ExportSet, InsertOutcome};
use crate::types::{ExportEntry, FrameId, ResultBatch, ResultId, ResultItem, TaskMode};

/// Result of [`ViewState::apply_page_append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageOutcome {
    /// The page was in sequence and its items were appended.
    Appended { page: u32, count: usize },
    /// The page was out of order or a duplicate and was not applied.
    Dropped { page: u32, expected: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct ViewState {
    results: Vec<ResultItem>,
    /// Last successfully applied page; `None` until the first page lands.
    last_page: Option<u32>,
    exports: ExportSet,
    annotations: HashMap<FrameId, String>,
    selected_objects: BTreeSet<String>,
    task_mode: TaskMode,
    loading: bool,
    quick_search: bool,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- results ----

    /// Replace the current results with `batch`.
    ///
    /// Clears the pagination cursor, so pages belonging to an earlier
    /// paginated search are rejected afterwards. Selected objects that no
    /// longer occur in the new results are deselected.
    pub fn apply_full_replace(&mut self, batch: ResultBatch) -> usize {
        self.results = batch.items;
        self.last_page = None;

        let index = self.object_index();
        self.selected_objects.retain(|tag| index.contains_key(tag));

        self.results.len()
    }

    /// Append a pagination page if it is exactly the next expected page.
    pub fn apply_page_append(&mut self, batch: ResultBatch, page: u32) -> PageOutcome {
        let expected = self.next_page();
        if page != expected {
            tracing::warn!(page, expected, "Dropping out-of-order result page");
            return PageOutcome::Dropped { page, expected };
        }

        let count = batch.items.len();
        self.results.extend(batch.items);
        self.last_page = Some(page);
        PageOutcome::Appended { page, count }
    }

    /// Page index the next append must carry.
    pub fn next_page(&self) -> u32 {
        self.last_page.map_or(0, |page| page + 1)
    }

    pub fn last_page(&self) -> Option<u32> {
        self.last_page
    }

    /// Clear results and the pagination cursor.
    pub fn reset_search(&mut self) {
        self.results.clear();
        self.last_page = None;
    }

    /// Full, unfiltered result list.
    pub fn results(&self) -> &[ResultItem] {
        &self.results
    }

    /// Backend id of the result at `index` in the unfiltered list.
    pub fn result_id_at(&self, index: usize) -> Option<ResultId> {
        self.results.get(index).map(|item| item.id.clone())
    }

    /// Results passing the object filter, in batch order.
    pub fn visible_iter(&self) -> impl Iterator<Item = &ResultItem> {
        self.results.iter().filter(|item| {
            self.selected_objects.is_empty() || item.has_any_tag(&self.selected_objects)
        })
    }

    /// Snapshot of the visible projection.
    pub fn visible_results(&self) -> ResultBatch {
        ResultBatch {
            items: self.visible_iter().cloned().collect(),
            page: self.last_page,
        }
    }

    // ---- object filter ----

    /// Number of frames carrying each object tag in the current results.
    pub fn object_index(&self) -> BTreeMap<String, usize> {
        let mut index = BTreeMap::new();
        for item in &self.results {
            for tag in &item.object_tags {
                *index.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        index
    }

    pub fn set_selected_objects(&mut self, selected: BTreeSet<String>) {
        self.selected_objects = selected;
    }

    /// Select or deselect a single object tag.
    pub fn toggle_object(&mut self, tag: &str, selected: bool) {
        if selected {
            self.selected_objects.insert(tag.to_string());
        } else {
            self.selected_objects.remove(tag);
        }
    }

    pub fn selected_objects(&self) -> &BTreeSet<String> {
        &self.selected_objects
    }

    // ---- exports ----

    pub fn apply_export_insert(&mut self, entry: ExportEntry) -> InsertOutcome {
        self.exports.insert(entry)
    }

    pub fn apply_export_remove(&mut self, index: usize) -> Result<ExportEntry, CoreError> {
        self.exports.remove(index)
    }

    pub fn reset_exports(&mut self) {
        self.exports.clear();
    }

    pub fn exports(&self) -> &[ExportEntry] {
        self.exports.entries()
    }

    pub fn export_count(&self) -> usize {
        self.exports.len()
    }

    // ---- annotations ----

    /// Last writer wins, whether local or remote.
    pub fn apply_annotation(&mut self, frame_id: FrameId, text: impl Into<String>) {
        self.annotations.insert(frame_id, text.into());
    }

    pub fn annotation(&self, frame_id: FrameId) -> Option<&str> {
        self.annotations.get(&frame_id).map(String::as_str)
    }

    // ---- modes / flags ----

    /// Switch the task mode. Results are kept; only the projection the
    /// shell renders changes. Returns `true` if the mode changed.
    pub fn set_task_mode(&mut self, mode: TaskMode) -> bool {
        let changed = self.task_mode != mode;
        self.task_mode = mode;
        changed
    }

    pub fn task_mode(&self) -> TaskMode {
        self.task_mode
    }

    /// Toggle quick-search mode. Either direction starts from an empty
    /// result list.
    pub fn set_quick_search(&mut self, enabled: bool) {
        self.quick_search = enabled;
        self.reset_search();
    }

    pub fn quick_search(&self) -> bool {
        self.quick_search
    }

    /// Returns `true` if the flag changed.
    pub fn set_loading(&mut self, loading: bool) -> bool {
        let changed = self.loading != loading;
        self.loading = loading;
        changed
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }
}
