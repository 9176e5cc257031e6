//! Synchronization Engine Module
//!
//! This module provides all the core logic for reconciling records between a
//! source and a destination repository. It is composed of several
//! submodules, each responsible for a specific aspect of the process:
//!
//! - `policy`: The per-task policy store holding attribute-level
//!   reconciliation rules (keep/force/merge, seed values, write allow-list).
//! - `diff`: The pure comparison engine turning a policy and a pair of
//!   records into a minimal set of attribute changes.
//! - `condition`: Per-operation condition gating through an injected
//!   expression evaluator.
//! - `orchestrator`: The per-entry state machine wiring fetch, diff, gate,
//!   apply, hooks and counting together.
//! - `runner` and `poller`: The synchronous bounded worker pool and the
//!   asynchronous polling loop that drive the orchestrator at scale.
//! - `counter`: Lock-free per-run counters read by the management layer.
//! - `manager`: The management surface over the configured tasks.
//!
//! Entries are reconciled independently; only a lost connector connection
//! aborts a run as a whole.

/// Per-operation condition gating and evaluator contract
pub mod condition;
/// Task configuration structures
pub mod config;
/// Per-run counters
pub mod counter;
/// Pure diff/modification engine
pub mod diff;
/// Error taxonomy for synchronization runs
pub mod error;
/// Post-operation hooks
pub mod hooks;
/// Management surface over configured tasks
pub mod manager;
/// Per-entry reconciliation state machine
pub mod orchestrator;
/// Asynchronous polling loop
pub mod poller;
/// Per-task policy store
pub mod policy;
/// Bounded worker pool for synchronous runs
pub mod runner;

pub use error::SyncError;
pub use manager::{SyncManager, SyncTask, TaskStatus};
