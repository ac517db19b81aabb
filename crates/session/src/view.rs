//! The session's shared view state plus change notification.
//!
//! [`SharedView`] is the only writer of [`ViewState`] and [`QueryHistory`]
//! inside a session. Each method mutates under a short lock, releases it,
//! then publishes the matching [`SessionEvent`]s. Locks are never held
//! across `.await`.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use framesync_core::error::CoreError;
use framesync_core::history::{HistoryEntry, QueryHistory};
use framesync_core::types::{ExportEntry, FrameId, ResultBatch, TaskMode};
use framesync_core::view_state::{PageOutcome, ViewState};
use framesync_core::InsertOutcome;
use framesync_events::{EventBus, NoticeLevel, SessionEvent};

pub struct SharedView {
    state: Mutex<ViewState>,
    history: Mutex<QueryHistory>,
    bus: Arc<EventBus>,
}

impl SharedView {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            state: Mutex::new(ViewState::new()),
            history: Mutex::new(QueryHistory::new()),
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Run `f` against a consistent snapshot of the state.
    pub fn read<R>(&self, f: impl FnOnce(&ViewState) -> R) -> R {
        f(&self.state())
    }

    pub fn visible_results(&self) -> ResultBatch {
        self.state().visible_results()
    }

    pub fn exports(&self) -> Vec<ExportEntry> {
        self.state().exports().to_vec()
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    pub fn local_history(&self) -> Vec<HistoryEntry> {
        self.history().local().to_vec()
    }

    pub fn shared_history(&self) -> Vec<HistoryEntry> {
        self.history().shared().to_vec()
    }

    // ---- results ----

    pub fn replace_results(&self, batch: ResultBatch) -> usize {
        let (count, selection) = {
            let mut state = self.state();
            let before = state.selected_objects().clone();
            let count = state.apply_full_replace(batch);
            let after = state.selected_objects();
            (count, (before != *after).then(|| after.iter().cloned().collect()))
        };
        tracing::debug!(count, "Results replaced");
        self.bus.publish(SessionEvent::ResultsReplaced { count });
        if let Some(selected) = selection {
            self.bus.publish(SessionEvent::SelectionChanged { selected });
        }
        count
    }

    pub fn append_page(&self, batch: ResultBatch, page: u32) -> PageOutcome {
        let outcome = self.state().apply_page_append(batch, page);
        self.bus.publish(match outcome {
            PageOutcome::Appended { page, count } => SessionEvent::PageAppended { page, count },
            PageOutcome::Dropped { page, expected } => SessionEvent::PageDropped { page, expected },
        });
        outcome
    }

    pub fn next_page(&self) -> u32 {
        self.state().next_page()
    }

    pub fn reset_search(&self) {
        self.state().reset_search();
        self.bus.publish(SessionEvent::ResultsReplaced { count: 0 });
    }

    pub fn set_quick_search(&self, enabled: bool) {
        self.state().set_quick_search(enabled);
        tracing::info!(enabled, "Quick search toggled");
        self.bus.publish(SessionEvent::ResultsReplaced { count: 0 });
    }

    // ---- object filter ----

    pub fn set_selected_objects(&self, selected: BTreeSet<String>) {
        let selected_list: Vec<String> = selected.iter().cloned().collect();
        self.state().set_selected_objects(selected);
        self.bus.publish(SessionEvent::SelectionChanged {
            selected: selected_list,
        });
    }

    pub fn toggle_object(&self, tag: &str, selected: bool) {
        let selected_list: Vec<String> = {
            let mut state = self.state();
            state.toggle_object(tag, selected);
            state.selected_objects().iter().cloned().collect()
        };
        self.bus.publish(SessionEvent::SelectionChanged {
            selected: selected_list,
        });
    }

    // ---- exports / annotations ----

    pub fn insert_export(&self, entry: ExportEntry) -> InsertOutcome {
        let (outcome, count) = {
            let mut state = self.state();
            let outcome = state.apply_export_insert(entry);
            (outcome, state.export_count())
        };
        if outcome.is_inserted() {
            self.bus.publish(SessionEvent::ExportsChanged { count });
        }
        outcome
    }

    pub fn remove_export(&self, index: usize) -> Result<ExportEntry, CoreError> {
        let (removed, count) = {
            let mut state = self.state();
            let removed = state.apply_export_remove(index)?;
            (removed, state.export_count())
        };
        self.bus.publish(SessionEvent::ExportsChanged { count });
        Ok(removed)
    }

    pub fn reset_exports(&self) {
        self.state().reset_exports();
        self.bus.publish(SessionEvent::ExportsChanged { count: 0 });
    }

    pub fn annotate(&self, frame_id: FrameId, text: &str) {
        self.state().apply_annotation(frame_id, text);
        self.bus.publish(SessionEvent::AnnotationChanged {
            frame_id,
            text: text.to_string(),
        });
    }

    // ---- flags ----

    pub fn set_task_mode(&self, mode: TaskMode) {
        if self.state().set_task_mode(mode) {
            tracing::info!(mode = mode.as_str(), "Task mode changed");
            self.bus.publish(SessionEvent::TaskModeChanged { mode });
        }
    }

    pub fn set_loading(&self, loading: bool) {
        if self.state().set_loading(loading) {
            self.bus.publish(SessionEvent::LoadingChanged { loading });
        }
    }

    // ---- history ----

    pub fn record_local_query(&self, query: &str) -> bool {
        self.history().record_local(query)
    }

    pub fn record_shared_query(&self, query: &str) {
        self.history().record_shared(query);
        self.bus.publish(SessionEvent::SharedQueryReceived {
            query: query.to_string(),
        });
    }

    pub fn clear_local_history(&self) {
        self.history().clear_local();
    }

    pub fn clear_shared_history(&self) {
        self.history().clear_shared();
    }

    // ---- notices ----

    pub fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.bus.publish(SessionEvent::notice(level, message));
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, QueryHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
