//! Management surface over the configured synchronization tasks.
//!
//! The manager owns the task registry built from configuration and exposes
//! the operations a control layer drives: run a task synchronously, start
//! and stop the asynchronous poller, query running state and counters. The
//! transport sitting on top (CLI, RPC, whatever the deployment uses) is out
//! of scope here.

use crate::connector::{Dataset, InMemoryService, Record};
use crate::sync::condition::{Evaluator, LiteralEvaluator};
use crate::sync::config::{ConnectorConfig, TaskConfig};
use crate::sync::counter::{CounterSnapshot, TaskCounter};
use crate::sync::error::SyncError;
use crate::sync::hooks::{HookRunner, LoggingHookRunner};
use crate::sync::orchestrator::TaskOrchestrator;
use crate::sync::poller::AsyncPoller;
use crate::sync::policy::SyncPolicy;
use crate::sync::runner::TaskRunner;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One fully wired task: orchestrator, runner and the async-capable source.
pub struct SyncTask {
    config: TaskConfig,
    runner: TaskRunner,
    async_source: Arc<InMemoryService>,
}

impl SyncTask {
    /// Build a task from its configuration and collaborators.
    pub fn build(
        config: TaskConfig,
        evaluator: Arc<dyn Evaluator>,
        hooks: Arc<dyn HookRunner>,
    ) -> Result<Self, SyncError> {
        if config.name.trim().is_empty() {
            return Err(SyncError::Configuration("task name must not be empty".into()));
        }
        let policy = Arc::new(SyncPolicy::build(
            config.policy_kind,
            config
                .policy_entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        ));
        let source = resolve_connector(&config.source);
        let destination = resolve_connector(&config.destination);

        let orchestrator = Arc::new(
            TaskOrchestrator::new(
                config.name.clone(),
                policy,
                source.clone(),
                destination,
                evaluator,
                hooks,
                Arc::new(TaskCounter::new()),
            )
            .with_dry_run(config.dry_run)
            .with_post_hooks(&config.post_hooks),
        );
        let runner = TaskRunner::new(
            orchestrator,
            config.worker_count,
            config.drain_timeout(),
        );

        Ok(Self {
            config,
            runner,
            async_source: source,
        })
    }

    /// The task name.
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Resolve a connector configuration to a live service.
///
/// The variant set is closed; adding a protocol connector means adding a
/// variant and an arm here, not loading a class by name.
fn resolve_connector(config: &ConnectorConfig) -> Arc<InMemoryService> {
    match config {
        ConnectorConfig::Memory {
            pivot_attribute,
            records,
            poll_interval_ms,
        } => {
            let mut service = InMemoryService::new(pivot_attribute);
            if let Some(ms) = poll_interval_ms {
                service = service.with_poll_interval(Duration::from_millis(*ms));
            }
            for seed in records {
                let mut attributes = Dataset::new();
                for (name, values) in &seed.attributes {
                    attributes.set(name, values.clone());
                }
                service.insert(Record::new(seed.main_id.clone(), attributes));
            }
            Arc::new(service)
        }
    }
}

struct RunningPoller {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

struct ManagedTask {
    task: SyncTask,
    poller: Option<RunningPoller>,
}

/// Snapshot of one task for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub running: bool,
    pub counters: CounterSnapshot,
    pub summary: String,
}

/// Registry and control point for all configured tasks.
pub struct SyncManager {
    tasks: HashMap<String, ManagedTask>,
}

impl SyncManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Register a task from configuration with the default collaborators.
    pub fn register(&mut self, config: TaskConfig) -> Result<(), SyncError> {
        self.register_with(config, Arc::new(LiteralEvaluator), Arc::new(LoggingHookRunner))
    }

    /// Register a task with explicit evaluator and hook runner.
    pub fn register_with(
        &mut self,
        config: TaskConfig,
        evaluator: Arc<dyn Evaluator>,
        hooks: Arc<dyn HookRunner>,
    ) -> Result<(), SyncError> {
        let task = SyncTask::build(config, evaluator, hooks)?;
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(SyncError::Configuration(format!(
                "task `{}` is already registered",
                name
            )));
        }
        info!("registered task {}", name);
        self.tasks.insert(name, ManagedTask { task, poller: None });
        Ok(())
    }

    /// Names of all registered tasks.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    fn managed(&self, name: &str) -> Result<&ManagedTask, SyncError> {
        self.tasks
            .get(name)
            .ok_or_else(|| SyncError::Configuration(format!("unknown task `{}`", name)))
    }

    fn managed_mut(&mut self, name: &str) -> Result<&mut ManagedTask, SyncError> {
        self.tasks
            .get_mut(name)
            .ok_or_else(|| SyncError::Configuration(format!("unknown task `{}`", name)))
    }

    /// Run one full synchronize pass and return the final counters.
    pub async fn run_synchronous(&self, name: &str) -> Result<CounterSnapshot, SyncError> {
        self.managed(name)?.task.runner.run_synchronize().await
    }

    /// Run one clean pass and return the final counters.
    pub async fn run_clean(&self, name: &str) -> Result<CounterSnapshot, SyncError> {
        self.managed(name)?.task.runner.run_clean().await
    }

    /// Start the asynchronous poller for a task.
    pub fn start_asynchronous(&mut self, name: &str) -> Result<(), SyncError> {
        if self.is_running(name) {
            return Err(SyncError::Configuration(format!(
                "task `{}` is already running",
                name
            )));
        }
        let managed = self.managed_mut(name)?;
        let poller = Arc::new(AsyncPoller::new(
            managed.task.runner.orchestrator().clone(),
            managed.task.async_source.clone(),
            managed.task.config.worker_count,
            managed.task.config.drain_timeout(),
        ));
        let stop = poller.stop_flag();
        let handle = tokio::spawn(async move { poller.run().await });
        managed.poller = Some(RunningPoller { handle, stop });
        info!("started asynchronous task {}", name);
        Ok(())
    }

    /// Stop the asynchronous poller.
    ///
    /// Graceful stop waits for the poller's own bounded drain; otherwise the
    /// loop is aborted outright.
    pub async fn stop_asynchronous(&mut self, name: &str, graceful: bool) -> Result<(), SyncError> {
        let managed = self.managed_mut(name)?;
        let Some(running) = managed.poller.take() else {
            warn!("task {} is not running", name);
            return Ok(());
        };
        running.stop.store(true, Ordering::Relaxed);
        if graceful {
            if let Err(e) = running.handle.await {
                warn!("poller for {} ended abnormally: {}", name, e);
            }
        } else {
            running.handle.abort();
        }
        info!("stopped asynchronous task {}", name);
        Ok(())
    }

    /// Whether a task's poller is currently alive.
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .and_then(|m| m.poller.as_ref())
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Counter snapshot plus textual summary for one task.
    pub fn status(&self, name: &str) -> Result<TaskStatus, SyncError> {
        let managed = self.managed(name)?;
        let counters = managed.task.runner.orchestrator().counter().snapshot();
        let summary = counters.summary();
        Ok(TaskStatus {
            name: name.to_string(),
            running: self.is_running(name),
            counters,
            summary,
        })
    }
}

impl Default for SyncManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::config::SeedRecord;
    use std::collections::BTreeMap;

    fn seed(main_id: &str, uid: &str, cn: &str) -> SeedRecord {
        let mut attributes = BTreeMap::new();
        attributes.insert("uid".to_string(), vec![uid.to_string()]);
        attributes.insert("cn".to_string(), vec![cn.to_string()]);
        SeedRecord {
            main_id: main_id.to_string(),
            attributes,
        }
    }

    fn config(name: &str) -> TaskConfig {
        let mut policy_entries = BTreeMap::new();
        policy_entries.insert("write_attributes".to_string(), "uid, cn".to_string());
        TaskConfig {
            name: name.to_string(),
            worker_count: 2,
            drain_timeout_secs: 5,
            dry_run: Default::default(),
            policy_kind: Default::default(),
            policy_entries,
            post_hooks: vec![],
            source: ConnectorConfig::Memory {
                pivot_attribute: "uid".to_string(),
                records: vec![seed("uid=a", "a", "Alice"), seed("uid=b", "b", "Bob")],
                poll_interval_ms: Some(5),
            },
            destination: ConnectorConfig::Memory {
                pivot_attribute: "uid".to_string(),
                records: vec![],
                poll_interval_ms: None,
            },
        }
    }

    #[tokio::test]
    async fn synchronous_run_reports_counters() {
        let mut manager = SyncManager::new();
        manager.register(config("hr")).unwrap();

        let snapshot = manager.run_synchronous("hr").await.unwrap();
        assert_eq!(snapshot.seen, 2);
        assert_eq!(snapshot.applied, 2);

        let status = manager.status("hr").unwrap();
        assert!(!status.running);
        assert_eq!(status.counters.applied, 2);
        assert!(status.summary.contains("2 applied"));
    }

    #[tokio::test]
    async fn unknown_task_is_a_configuration_error() {
        let manager = SyncManager::new();
        let err = manager.run_synchronous("nope").await.unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let mut manager = SyncManager::new();
        manager.register(config("hr")).unwrap();
        assert!(manager.register(config("hr")).is_err());
    }

    #[tokio::test]
    async fn asynchronous_lifecycle_start_and_graceful_stop() {
        let mut manager = SyncManager::new();
        manager.register(config("hr")).unwrap();

        assert!(!manager.is_running("hr"));
        manager.start_asynchronous("hr").unwrap();
        assert!(manager.is_running("hr"));
        assert!(manager.start_asynchronous("hr").is_err());

        manager.stop_asynchronous("hr", true).await.unwrap();
        assert!(!manager.is_running("hr"));
    }
}
