use thiserror::Error;

/// engine error taxonomy. overlap failures and small-sample guardrails are
/// not errors: they come back inside responses with diagnostics attached.
#[derive(Debug, Error)]
pub enum Error {
    #[error("engine not loaded")]
    EngineUnavailable,
    #[error("unknown token: {0}")]
    UnknownToken(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("snapshot version mismatch: found {found}, expected {expected} (rebuild the snapshot)")]
    SnapshotVersionMismatch { found: u32, expected: u32 },
    #[error("snapshot corrupt: {0}")]
    SnapshotCorrupt(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// fatal errors refuse service; the rest are per-request
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SnapshotVersionMismatch { .. } | Self::SnapshotCorrupt(_)
        )
    }
}
