//! Export selection with `(frame_id, video_frame_key)` de-duplication.

use serde::Serialize;

use crate::error::CoreError;
use crate::types::{ExportEntry, FrameId};

/// Result of an insertion attempt. A duplicate is a normal outcome, not
/// an error, and callers are free to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

impl InsertOutcome {
    pub fn is_inserted(self) -> bool {
        self == InsertOutcome::Inserted
    }
}

/// Ordered list of exported frames; insertion order is export order.
#[derive(Debug, Clone, Default)]
pub struct ExportSet {
    entries: Vec<ExportEntry>,
}

impl ExportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` unless an entry with the same identity exists.
    pub fn insert(&mut self, entry: ExportEntry) -> InsertOutcome {
        if self.contains(entry.frame_id, &entry.video_frame_key) {
            tracing::debug!(
                frame_id = entry.frame_id,
                key = %entry.video_frame_key,
                "Export entry already present",
            );
            return InsertOutcome::Duplicate;
        }
        self.entries.push(entry);
        InsertOutcome::Inserted
    }

    /// Remove the entry at `index` (export order).
    pub fn remove(&mut self, index: usize) -> Result<ExportEntry, CoreError> {
        if index >= self.entries.len() {
            return Err(CoreError::ExportIndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        Ok(self.entries.remove(index))
    }

    pub fn contains(&self, frame_id: FrameId, video_frame_key: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.identity() == (frame_id, video_frame_key))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[ExportEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::types::Origin;

    fn entry(frame_id: FrameId, src: &str, origin: Origin) -> ExportEntry {
        ExportEntry::new(frame_id, src, "L01_V001-1.5", origin)
    }

    #[test]
    fn identical_identity_keeps_first() {
        let mut set = ExportSet::new();
        let first = entry(42, "/k/L01_V001/0042.jpg", Origin::Remote);
        let second = entry(42, "/other/L01_V001/0042.webp", Origin::Local);

        assert_eq!(set.insert(first.clone()), InsertOutcome::Inserted);
        assert_eq!(set.insert(second), InsertOutcome::Duplicate);
        assert_eq!(set.len(), 1);
        assert_eq!(set.entries()[0], first);
    }

    #[test]
    fn same_frame_different_video_is_distinct() {
        let mut set = ExportSet::new();
        set.insert(entry(42, "/k/L01_V001/0042.jpg", Origin::Local));
        let outcome = set.insert(entry(42, "/k/L01_V002/0042.jpg", Origin::Local));
        assert!(outcome.is_inserted());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn remove_by_index() {
        let mut set = ExportSet::new();
        set.insert(entry(1, "/a/V/1.jpg", Origin::Local));
        set.insert(entry(2, "/a/V/2.jpg", Origin::Local));

        let removed = set.remove(0).unwrap();
        assert_eq!(removed.frame_id, 1);
        assert_eq!(set.entries()[0].frame_id, 2);
    }

    #[test]
    fn remove_out_of_range() {
        let mut set = ExportSet::new();
        assert_matches!(
            set.remove(3),
            Err(CoreError::ExportIndexOutOfRange { index: 3, len: 0 })
        );
    }

    #[test]
    fn removed_entry_can_be_re_added() {
        let mut set = ExportSet::new();
        set.insert(entry(1, "/a/V/1.jpg", Origin::Local));
        set.remove(0).unwrap();
        assert!(set.insert(entry(1, "/a/V/1.jpg", Origin::Local)).is_inserted());
    }
}
