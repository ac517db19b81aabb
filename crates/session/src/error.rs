use framesync_channels::{ApiError, ChannelError, TranslateError};
use framesync_core::CoreError;

use crate::config::ConfigError;

/// Errors returned by session operations.
///
/// Stale responses, duplicate exports and out-of-order pages are outcomes,
/// not errors, and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A send on a channel failed, usually because it is not open.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// A similarity or group search named a row that is not in the results.
    #[error("No result at index {0}")]
    NoSuchResult(usize),
}

impl SessionError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, SessionError::Channel(e) if e.is_not_ready())
    }
}
