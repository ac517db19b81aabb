//! Export selection shared with peers over the share-image channel.
//!
//! Local additions and annotation edits are broadcast; remote ones are
//! applied through the same [`SharedView`] path but never re-sent, which
//! keeps peers from echoing each other's edits back and forth.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use framesync_channels::messages::{ExportLog, ShareMessage};
use framesync_channels::{ChannelRegistry, Endpoint};
use framesync_core::types::{ExportEntry, FrameId, Origin, TaskMode};
use framesync_core::InsertOutcome;
use framesync_events::NoticeLevel;
use serde::Serialize;

use crate::error::SessionError;
use crate::view::SharedView;

/// Result of [`ExportSession::add_local`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExportOutcome {
    /// Added. `shared` tells whether the broadcast went out.
    Inserted { shared: bool },
    /// Already selected; nothing changed and nothing was sent.
    Duplicate,
}

pub struct ExportSession {
    view: Arc<SharedView>,
    registry: Arc<ChannelRegistry>,
    sharing_enabled: AtomicBool,
}

impl ExportSession {
    pub fn new(
        view: Arc<SharedView>,
        registry: Arc<ChannelRegistry>,
        sharing_enabled: bool,
    ) -> Self {
        Self {
            view,
            registry,
            sharing_enabled: AtomicBool::new(sharing_enabled),
        }
    }

    /// Takes effect from the next call; earlier additions are not re-sent.
    pub fn set_sharing_enabled(&self, enabled: bool) {
        self.sharing_enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "Export sharing toggled");
    }

    pub fn sharing_enabled(&self) -> bool {
        self.sharing_enabled.load(Ordering::SeqCst)
    }

    /// Add a frame picked by this user.
    ///
    /// A duplicate is a silent no-op. A broadcast that cannot be sent is
    /// reported as a notice; the local insert stands.
    pub fn add_local(&self, frame_id: FrameId, src: &str, frame_info: &str) -> ExportOutcome {
        let entry = ExportEntry::new(frame_id, src, frame_info, Origin::Local);
        if self.view.insert_export(entry) == InsertOutcome::Duplicate {
            return ExportOutcome::Duplicate;
        }

        if !self.sharing_enabled() {
            return ExportOutcome::Inserted { shared: false };
        }

        let message = ShareMessage::ImageShare {
            frame_id,
            src: src.to_string(),
            frame_info: frame_info.to_string(),
        };
        let shared = self.broadcast(&message);
        ExportOutcome::Inserted { shared }
    }

    /// Add a frame a peer picked. Never broadcasts.
    pub fn add_remote(&self, frame_id: FrameId, src: &str, frame_info: &str) -> InsertOutcome {
        let entry = ExportEntry::new(frame_id, src, frame_info, Origin::Remote);
        let outcome = self.view.insert_export(entry);
        tracing::debug!(frame_id, ?outcome, "Applied remote export");
        outcome
    }

    /// Remove the entry at `index`. Removal is local only.
    pub fn remove(&self, index: usize) -> Result<ExportEntry, SessionError> {
        Ok(self.view.remove_export(index)?)
    }

    pub fn reset(&self) {
        self.view.reset_exports();
    }

    pub fn entries(&self) -> Vec<ExportEntry> {
        self.view.exports()
    }

    /// Set this user's answer for a frame and share it. Returns whether
    /// the update reached the channel.
    pub fn annotate_local(&self, frame_id: FrameId, text: &str) -> bool {
        self.view.annotate(frame_id, text);
        self.broadcast(&ShareMessage::VqaInputUpdate {
            frame_id,
            vqa_input: text.to_string(),
        })
    }

    /// Apply a peer's answer. Never broadcasts.
    pub fn annotate_remote(&self, frame_id: FrameId, text: &str) {
        self.view.annotate(frame_id, text);
    }

    /// Record an exported file on the log channel.
    pub fn log_export(
        &self,
        file_name: &str,
        task: TaskMode,
        top_images: Vec<String>,
    ) -> Result<(), SessionError> {
        let log = ExportLog {
            file_name: file_name.to_string(),
            task_type: task.as_str().to_string(),
            top_images,
        };
        self.registry.send_json(Endpoint::Log, &log).map_err(|e| {
            tracing::warn!(error = %e, file_name, "Export log not sent");
            self.view.notify(NoticeLevel::Error, e.to_string());
            SessionError::from(e)
        })
    }

    fn broadcast(&self, message: &ShareMessage) -> bool {
        match self.registry.send_json(Endpoint::ShareImage, message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Share message not sent");
                self.view.notify(NoticeLevel::Error, e.to_string());
                false
            }
        }
    }
}
