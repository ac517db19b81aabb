#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Export index {index} out of range (len {len})")]
    ExportIndexOutOfRange { index: usize, len: usize },

    #[error("Preference store I/O error: {0}")]
    PreferenceIo(#[from] std::io::Error),

    #[error("Preference store is corrupt: {0}")]
    PreferenceFormat(#[from] serde_json::Error),
}
