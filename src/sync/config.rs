//! Task configuration.
//!
//! One [`TaskConfig`] fully describes a synchronization task: connectors,
//! worker pool size, shutdown drain timeout, dry-run flags, policy kind and
//! the raw policy entries. Deserialized from JSON by the binary; defaults
//! keep a minimal configuration short.

use crate::connector::SyncOperation;
use crate::sync::hooks::HookFormat;
use crate::sync::policy::PolicyKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_worker_count() -> usize {
    4
}

fn default_drain_timeout_secs() -> u64 {
    30
}

/// Configuration of one synchronization task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task name, used in logs and for management lookups.
    pub name: String,
    /// Worker pool size for entry reconciliation.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// How long shutdown waits for in-flight entries before abandoning them.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// Per-operation dry-run flags.
    #[serde(default)]
    pub dry_run: DryRunFlags,
    /// Which policy implementation to build.
    #[serde(default)]
    pub policy_kind: PolicyKind,
    /// Raw policy entries, parsed by the policy store.
    #[serde(default)]
    pub policy_entries: BTreeMap<String, String>,
    /// Post-operation hooks.
    #[serde(default)]
    pub post_hooks: Vec<HookConfig>,
    /// Source repository.
    pub source: ConnectorConfig,
    /// Destination repository.
    pub destination: ConnectorConfig,
}

impl TaskConfig {
    /// Shutdown drain timeout as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Dry-run switches, one per operation kind.
///
/// A dry operation is logged as "would apply" and counted as changeable,
/// never applied.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DryRunFlags {
    #[serde(default)]
    pub no_create: bool,
    #[serde(default)]
    pub no_update: bool,
    #[serde(default)]
    pub no_delete: bool,
    #[serde(default)]
    pub no_rename: bool,
}

impl DryRunFlags {
    /// Check whether the given operation is suppressed.
    pub fn is_dry(&self, operation: SyncOperation) -> bool {
        match operation {
            SyncOperation::Create => self.no_create,
            SyncOperation::Update => self.no_update,
            SyncOperation::Delete => self.no_delete,
            SyncOperation::Rename => self.no_rename,
            SyncOperation::Noop => false,
        }
    }
}

/// One post-operation hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    /// Operation the hook reacts to.
    pub operation: SyncOperation,
    /// Script path handed to the hook runner.
    pub script: String,
    /// Payload rendering format.
    pub format: HookFormat,
}

/// Closed set of connector implementations this build knows about.
///
/// Protocol connectors register here as new variants; resolution is an
/// explicit match, not runtime class loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorConfig {
    Memory {
        /// Attribute used as the business key in pivot listings.
        pivot_attribute: String,
        /// Records the repository starts with.
        #[serde(default)]
        records: Vec<SeedRecord>,
        /// Idle poll interval in milliseconds for the async source role.
        #[serde(default)]
        poll_interval_ms: Option<u64>,
    },
}

/// One seeded record for the in-memory connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRecord {
    pub main_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}
