use crate::connector::ConnectorError;
use crate::sync::condition::EvaluationError;

/// Error taxonomy for synchronization runs.
///
/// Only a lost connector connection is fatal to a whole run; everything else
/// is isolated to the entry that raised it, counted and logged.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("no matching object: {0}")]
    NotFound(String),

    #[error("apply failed: {0}")]
    ApplyFailed(String),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SyncError {
    /// True when the error must abort the whole run rather than the entry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Connector(ConnectorError::ConnectionLost(_)))
    }
}
