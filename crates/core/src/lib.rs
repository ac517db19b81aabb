//! Data model and synchronous state for a framesync retrieval session.
//!
//! Nothing in this crate performs network I/O. The channel and session
//! crates feed it results and peer edits; it owns the rules for how those
//! mutations combine.

pub mod cache;
pub mod error;
pub mod export;
pub mod hashing;
pub mod history;
pub mod preferences;
pub mod types;
pub mod view_state;

pub use cache::{cache_key, ResultCache};
pub use error::CoreError;
pub use export::{ExportSet, InsertOutcome};
pub use history::QueryHistory;
pub use preferences::PreferenceStore;
pub use types::{
    ExportEntry, FrameId, Origin, Query, QueryKind, QueryMode, ResultBatch, ResultId, ResultItem,
    TaskMode,
};
pub use view_state::{PageOutcome, ViewState};
