//! Built-in in-memory connector.
//!
//! Reference implementation of the connector traits, backing the demo binary
//! and the test suite. Entries live in a mutex-guarded map keyed by their
//! main identifier; the configured pivot attribute doubles as the business
//! key exposed through `list_pivots`.

use crate::connector::service::{AsyncSourceService, ConnectorService, DestinationService};
use crate::connector::types::{
    ChangeKind, ConnectorError, Dataset, Modification, PivotId, Record, SyncOperation,
    normalize_attribute,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// In-memory repository usable as source, destination and async source.
pub struct InMemoryService {
    pivot_attribute: String,
    records: Mutex<HashMap<String, Record>>,
    changes: Mutex<VecDeque<PivotId>>,
    poll_interval: Duration,
    idle_polls: AtomicU64,
    connection_lost: AtomicBool,
    reject_applies: AtomicBool,
}

impl InMemoryService {
    /// Create an empty repository keyed on the given pivot attribute.
    pub fn new(pivot_attribute: &str) -> Self {
        Self {
            pivot_attribute: normalize_attribute(pivot_attribute),
            records: Mutex::new(HashMap::new()),
            changes: Mutex::new(VecDeque::new()),
            poll_interval: Duration::from_millis(500),
            idle_polls: AtomicU64::new(0),
            connection_lost: AtomicBool::new(false),
            reject_applies: AtomicBool::new(false),
        }
    }

    /// Builder-style record insertion.
    pub fn with_record(self, record: Record) -> Self {
        self.insert(record);
        self
    }

    /// Builder-style poll interval override.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Insert or replace a record, keyed by its main identifier.
    pub fn insert(&self, record: Record) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.main_id.clone(), record);
    }

    /// Queue a pivot for the asynchronous polling loop.
    pub fn push_change(&self, pivot: PivotId) {
        let mut changes = self.changes.lock().unwrap_or_else(|e| e.into_inner());
        changes.push_back(pivot);
    }

    /// Snapshot of one stored record, for assertions and status output.
    pub fn record(&self, main_id: &str) -> Option<Record> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(main_id).cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.len()
    }

    /// Check if the repository holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times `next_changed_id` found the queue empty.
    pub fn idle_polls(&self) -> u64 {
        self.idle_polls.load(Ordering::Relaxed)
    }

    /// Simulate a lost backend connection; every subsequent call fails.
    pub fn set_connection_lost(&self, lost: bool) {
        self.connection_lost.store(lost, Ordering::Relaxed);
    }

    /// Make `apply` reject every modification without raising.
    pub fn set_reject_applies(&self, reject: bool) {
        self.reject_applies.store(reject, Ordering::Relaxed);
    }

    fn check_connection(&self) -> Result<(), ConnectorError> {
        if self.connection_lost.load(Ordering::Relaxed) {
            return Err(ConnectorError::ConnectionLost(
                "in-memory backend marked unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn business_id(&self, record: &Record) -> String {
        record
            .attributes
            .values_of(&self.pivot_attribute)
            .and_then(|v| v.first())
            .cloned()
            .unwrap_or_else(|| record.main_id.clone())
    }

    fn apply_changes(record: &mut Record, modification: &Modification) {
        for change in &modification.changes {
            match change.kind {
                ChangeKind::Add => {
                    for value in &change.values {
                        record.attributes.add_value(&change.attribute, value.clone());
                    }
                }
                ChangeKind::Replace => {
                    record.attributes.set(&change.attribute, change.values.clone());
                }
                ChangeKind::Delete => {
                    record.attributes.remove(&change.attribute);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ConnectorService for InMemoryService {
    async fn fetch(&self, id: &str, _pivot: &Dataset) -> Result<Option<Record>, ConnectorError> {
        self.check_connection()?;
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = records.get(id) {
            return Ok(Some(record.clone()));
        }
        Ok(records
            .values()
            .find(|r| {
                r.attributes
                    .values_of(&self.pivot_attribute)
                    .is_some_and(|values| values.iter().any(|v| v == id))
            })
            .cloned())
    }

    async fn list_pivots(&self) -> Result<HashMap<String, PivotId>, ConnectorError> {
        self.check_connection()?;
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut pivots = HashMap::new();
        for record in records.values() {
            let id = self.business_id(record);
            let mut pivot = Dataset::new();
            pivot.set(
                &self.pivot_attribute,
                record.attributes.values_cloned(&self.pivot_attribute),
            );
            pivots.insert(id.clone(), PivotId::new(id, pivot));
        }
        Ok(pivots)
    }
}

#[async_trait::async_trait]
impl DestinationService for InMemoryService {
    async fn apply(&self, modification: &Modification) -> Result<bool, ConnectorError> {
        self.check_connection()?;
        if self.reject_applies.load(Ordering::Relaxed) {
            return Ok(false);
        }

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        match modification.operation {
            SyncOperation::Create => {
                let mut record = Record::new(modification.main_id.clone(), Dataset::new());
                Self::apply_changes(&mut record, modification);
                records.insert(record.main_id.clone(), record);
                Ok(true)
            }
            SyncOperation::Update => match records.get_mut(&modification.main_id) {
                Some(record) => {
                    Self::apply_changes(record, modification);
                    Ok(true)
                }
                None => Ok(false),
            },
            SyncOperation::Rename => {
                let Some(new_id) = modification.new_id.as_ref() else {
                    return Err(ConnectorError::ApplyRejected(
                        "rename without a new identifier".to_string(),
                    ));
                };
                match records.remove(&modification.main_id) {
                    Some(mut record) => {
                        record.main_id = new_id.clone();
                        Self::apply_changes(&mut record, modification);
                        records.insert(new_id.clone(), record);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            SyncOperation::Delete => Ok(records.remove(&modification.main_id).is_some()),
            SyncOperation::Noop => Ok(true),
        }
    }
}

#[async_trait::async_trait]
impl AsyncSourceService for InMemoryService {
    async fn next_changed_id(&self) -> Result<Option<PivotId>, ConnectorError> {
        self.check_connection()?;
        let mut changes = self.changes.lock().unwrap_or_else(|e| e.into_inner());
        let next = changes.pop_front();
        if next.is_none() {
            self.idle_polls.fetch_add(1, Ordering::Relaxed);
            debug!("change queue empty, reporting idle");
        }
        Ok(next)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
