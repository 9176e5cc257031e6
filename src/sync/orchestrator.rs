//! Per-entry reconciliation state machine.
//!
//! The orchestrator drives one entry through fetch, diff, condition gate,
//! apply, hook and counting. Two variants share the skeleton: the
//! synchronize path treats a missing source entry as an error, the clean
//! path treats it as the expected trigger for a destination delete.
//!
//! Failure isolation is the contract here: every per-entry problem is
//! caught, logged and counted inside this module. Only a lost connector
//! connection propagates out and aborts the surrounding run.

use crate::connector::{
    ConnectorService, DestinationService, Modification, PivotId, SyncOperation,
};
use crate::sync::condition::{Bindings, ConditionGate, Evaluator};
use crate::sync::config::{DryRunFlags, HookConfig};
use crate::sync::counter::TaskCounter;
use crate::sync::diff;
use crate::sync::error::SyncError;
use crate::sync::hooks::{HookFormat, HookRunner};
use crate::sync::policy::SyncPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives single entries through the reconciliation state machine.
///
/// Shared read-only across all worker tasks of a run.
pub struct TaskOrchestrator {
    task: String,
    policy: Arc<SyncPolicy>,
    source: Arc<dyn ConnectorService>,
    destination: Arc<dyn DestinationService>,
    gate: ConditionGate,
    evaluator: Arc<dyn Evaluator>,
    hooks: Arc<dyn HookRunner>,
    post_hooks: HashMap<SyncOperation, (String, HookFormat)>,
    counter: Arc<TaskCounter>,
    dry_run: DryRunFlags,
}

impl TaskOrchestrator {
    /// Create an orchestrator over the given collaborators.
    pub fn new(
        task: impl Into<String>,
        policy: Arc<SyncPolicy>,
        source: Arc<dyn ConnectorService>,
        destination: Arc<dyn DestinationService>,
        evaluator: Arc<dyn Evaluator>,
        hooks: Arc<dyn HookRunner>,
        counter: Arc<TaskCounter>,
    ) -> Self {
        Self {
            task: task.into(),
            policy,
            source,
            destination,
            gate: ConditionGate::new(evaluator.clone()),
            evaluator,
            hooks,
            post_hooks: HashMap::new(),
            counter,
            dry_run: DryRunFlags::default(),
        }
    }

    /// Set the per-operation dry-run flags.
    pub fn with_dry_run(mut self, dry_run: DryRunFlags) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Register the configured post-operation hooks.
    pub fn with_post_hooks(mut self, hooks: &[HookConfig]) -> Self {
        self.post_hooks = hooks
            .iter()
            .map(|h| (h.operation, (h.script.clone(), h.format)))
            .collect();
        self
    }

    /// The counter this orchestrator feeds.
    pub fn counter(&self) -> &Arc<TaskCounter> {
        &self.counter
    }

    /// Source pivot listing, for the synchronous run.
    pub async fn source_pivots(
        &self,
    ) -> Result<HashMap<String, PivotId>, SyncError> {
        Ok(self.source.list_pivots().await?)
    }

    /// Destination pivot listing, for the clean run.
    pub async fn destination_pivots(
        &self,
    ) -> Result<HashMap<String, PivotId>, SyncError> {
        Ok(self.destination.list_pivots().await?)
    }

    /// Reconcile one entry from the source into the destination.
    ///
    /// Returns `Err` only for run-fatal conditions; everything else is
    /// logged and counted here.
    pub async fn synchronize_entry(&self, pivot: &PivotId) -> Result<(), SyncError> {
        self.counter.inc_seen();

        let source = match self.source.fetch(&pivot.id, &pivot.pivot).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return self.entry_failure(
                    &pivot.id,
                    SyncError::NotFound(format!("no matching object in source for {}", pivot.id)),
                );
            }
            Err(e) => return self.entry_failure(&pivot.id, e.into()),
        };

        let destination = match self.destination.fetch(&pivot.id, &pivot.pivot).await {
            Ok(found) => found,
            Err(e) => return self.entry_failure(&pivot.id, e.into()),
        };

        let bindings = Bindings {
            task: &self.task,
            source: Some(&source),
            destination: destination.as_ref(),
        };

        let target_id = match self.target_id(&bindings) {
            Ok(target) => target,
            Err(e) => {
                self.counter.inc_failed();
                error!("[{}] destination id for {}: {}", self.task, pivot.id, e);
                return Ok(());
            }
        };

        let modification = diff::compute(
            &self.policy,
            Some(&source),
            destination.as_ref(),
            target_id.as_deref(),
        );

        if !self.gate_allows(&modification, &bindings, &pivot.id) {
            return Ok(());
        }
        if modification.is_noop() {
            debug!("[{}] {} already in sync", self.task, pivot.id);
            return Ok(());
        }

        self.apply_modification(&pivot.id, &modification).await
    }

    /// Remove one destination entry whose source counterpart disappeared.
    ///
    /// The destination record is expected to exist; a missing source is the
    /// normal trigger for the delete, not an error.
    pub async fn clean_entry(&self, pivot: &PivotId) -> Result<(), SyncError> {
        self.counter.inc_seen();

        let destination = match self.destination.fetch(&pivot.id, &pivot.pivot).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return self.entry_failure(
                    &pivot.id,
                    SyncError::NotFound(format!(
                        "no matching object in destination for {}",
                        pivot.id
                    )),
                );
            }
            Err(e) => return self.entry_failure(&pivot.id, e.into()),
        };

        let source = match self.source.fetch(&pivot.id, &pivot.pivot).await {
            Ok(found) => found,
            Err(e) => return self.entry_failure(&pivot.id, e.into()),
        };
        if source.is_some() {
            debug!("[{}] {} still present in source", self.task, pivot.id);
            return Ok(());
        }

        let modification = diff::compute(&self.policy, None, Some(&destination), None);
        let bindings = Bindings {
            task: &self.task,
            source: None,
            destination: Some(&destination),
        };
        if !self.gate_allows(&modification, &bindings, &pivot.id) {
            return Ok(());
        }

        self.apply_modification(&pivot.id, &modification).await
    }

    /// Compute the destination identifier from the policy's dn expression.
    fn target_id(&self, bindings: &Bindings<'_>) -> Result<Option<String>, SyncError> {
        match self.policy.dn_expression() {
            Some(expression) => {
                let id = self.evaluator.eval_string(expression, bindings)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Evaluate the operation's condition; a veto or an evaluation failure
    /// both stop the entry here.
    fn gate_allows(
        &self,
        modification: &Modification,
        bindings: &Bindings<'_>,
        id: &str,
    ) -> bool {
        let condition = self.policy.condition_for(modification.operation);
        match self.gate.allow(condition, bindings) {
            Ok(true) => true,
            Ok(false) => {
                debug!(
                    "[{}] condition vetoed {} for {}",
                    self.task, modification.operation, id
                );
                false
            }
            Err(e) => {
                self.counter.inc_failed();
                error!(
                    "[{}] condition for {} on {} failed: {}",
                    self.task, modification.operation, id, e
                );
                false
            }
        }
    }

    /// Count, honor dry-run, apply, hook.
    async fn apply_modification(
        &self,
        id: &str,
        modification: &Modification,
    ) -> Result<(), SyncError> {
        self.counter.inc_changeable();

        if self.dry_run.is_dry(modification.operation) {
            info!(
                "[{}] would apply {} to {} ({} attribute changes)",
                self.task,
                modification.operation,
                modification.main_id,
                modification.changes.len()
            );
            return Ok(());
        }

        match self.destination.apply(modification).await {
            Ok(true) => {
                self.run_post_hook(modification).await;
                self.counter.inc_applied();
                info!(
                    "[{}] applied {} to {} ({} attribute changes)",
                    self.task,
                    modification.operation,
                    modification.main_id,
                    modification.changes.len()
                );
                Ok(())
            }
            Ok(false) => self.entry_failure(
                id,
                SyncError::ApplyFailed(format!(
                    "destination rejected {} for {}",
                    modification.operation, modification.main_id
                )),
            ),
            Err(e) => self.entry_failure(id, e.into()),
        }
    }

    /// Best-effort post-operation hook; failures are logged only.
    async fn run_post_hook(&self, modification: &Modification) {
        let Some((script, format)) = self.post_hooks.get(&modification.operation) else {
            return;
        };
        if let Err(e) = self.hooks.run(script, *format, modification).await {
            warn!(
                "[{}] post hook {} for {} failed: {}",
                self.task, script, modification.main_id, e
            );
        }
    }

    /// Count a per-entry failure, or propagate a run-fatal one.
    fn entry_failure(&self, id: &str, error: SyncError) -> Result<(), SyncError> {
        if error.is_fatal() {
            error!("[{}] aborting run on {}: {}", self.task, id, error);
            return Err(error);
        }
        self.counter.inc_failed();
        error!("[{}] entry {} failed: {}", self.task, id, error);
        Ok(())
    }
}
