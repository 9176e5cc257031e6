//! Connector service traits consumed by the sync engine.
//!
//! The engine never talks to a directory, database or script directly; it
//! goes through these traits. Implementations are shared across worker
//! tasks and must be safe for concurrent use (internally pooled or locked).

use crate::connector::types::{ConnectorError, Dataset, Modification, PivotId, Record};
use std::collections::HashMap;
use std::time::Duration;

/// Base contract shared by source and destination repositories.
#[async_trait::async_trait]
pub trait ConnectorService: Send + Sync {
    /// Fetch the full record for an entry, located by its business key and
    /// pivot attributes. `None` means the repository holds no such entry.
    async fn fetch(&self, id: &str, pivot: &Dataset) -> Result<Option<Record>, ConnectorError>;

    /// Enumerate all entries as id -> pivot, without full fetches.
    async fn list_pivots(&self) -> Result<HashMap<String, PivotId>, ConnectorError>;
}

/// A repository the engine writes to.
#[async_trait::async_trait]
pub trait DestinationService: ConnectorService {
    /// Apply a computed modification. `Ok(false)` means the repository
    /// rejected the change without raising; both count as a failed apply.
    async fn apply(&self, modification: &Modification) -> Result<bool, ConnectorError>;
}

/// A source repository that can report changes incrementally, for the
/// asynchronous polling mode.
#[async_trait::async_trait]
pub trait AsyncSourceService: ConnectorService {
    /// Next changed entry, or `None` when the source is idle.
    async fn next_changed_id(&self) -> Result<Option<PivotId>, ConnectorError>;

    /// How long the poller should sleep when the source is idle.
    fn poll_interval(&self) -> Duration;
}
