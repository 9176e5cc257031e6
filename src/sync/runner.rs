//! Bounded worker pool driving a full synchronous run.
//!
//! The runner enumerates the relevant repository, submits one orchestrator
//! job per entry through a semaphore-bounded pool, then drains the pool
//! under the configured timeout. Entries are independent units of work; the
//! only cross-entry coupling is the abort on a lost connection.

use crate::connector::PivotId;
use crate::sync::counter::CounterSnapshot;
use crate::sync::error::SyncError;
use crate::sync::orchestrator::TaskOrchestrator;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Which orchestrator variant a run drives.
#[derive(Debug, Clone, Copy)]
enum RunVariant {
    Synchronize,
    Clean,
}

/// Fans entry reconciliation out over a bounded worker pool.
pub struct TaskRunner {
    orchestrator: Arc<TaskOrchestrator>,
    worker_count: usize,
    drain_timeout: Duration,
}

impl TaskRunner {
    /// Create a runner with the given pool size and shutdown drain timeout.
    pub fn new(
        orchestrator: Arc<TaskOrchestrator>,
        worker_count: usize,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            worker_count: worker_count.max(1),
            drain_timeout,
        }
    }

    /// The orchestrator this runner drives.
    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.orchestrator
    }

    /// Synchronize every source entry into the destination.
    pub async fn run_synchronize(&self) -> Result<CounterSnapshot, SyncError> {
        let pivots = self.orchestrator.source_pivots().await?;
        self.run(pivots, RunVariant::Synchronize).await
    }

    /// Remove destination entries whose source counterpart disappeared.
    pub async fn run_clean(&self) -> Result<CounterSnapshot, SyncError> {
        let pivots = self.orchestrator.destination_pivots().await?;
        self.run(pivots, RunVariant::Clean).await
    }

    async fn run(
        &self,
        pivots: HashMap<String, PivotId>,
        variant: RunVariant,
    ) -> Result<CounterSnapshot, SyncError> {
        self.orchestrator.counter().reset();
        let total = pivots.len();
        info!("starting {:?} run over {} entries", variant, total);

        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut jobs = JoinSet::new();

        for (_, pivot) in pivots {
            if aborted.load(Ordering::Relaxed) {
                warn!("run aborted, skipping remaining submissions");
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let orchestrator = self.orchestrator.clone();
            let aborted = aborted.clone();
            jobs.spawn(async move {
                let _permit = permit;
                let result = match variant {
                    RunVariant::Synchronize => orchestrator.synchronize_entry(&pivot).await,
                    RunVariant::Clean => orchestrator.clean_entry(&pivot).await,
                };
                if result.is_err() {
                    aborted.store(true, Ordering::Relaxed);
                }
                result
            });
        }

        let drain = async {
            let mut fatal: Option<SyncError> = None;
            while let Some(joined) = jobs.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                    Err(join_error) => {
                        self.orchestrator.counter().inc_failed();
                        error!("worker task failed to join: {}", join_error);
                    }
                }
            }
            fatal
        };

        match tokio::time::timeout(self.drain_timeout, drain).await {
            Ok(Some(fatal)) => Err(fatal),
            Ok(None) => {
                let snapshot = self.orchestrator.counter().snapshot();
                info!("run complete: {}", snapshot.summary());
                Ok(snapshot)
            }
            Err(_) => {
                // Abandon rather than cancel: killing a worker mid-apply
                // could leave a destination write half-applied.
                warn!(
                    "drain timed out after {:?}, abandoning {} in-flight jobs",
                    self.drain_timeout,
                    jobs.len()
                );
                jobs.detach_all();
                Ok(self.orchestrator.counter().snapshot())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Dataset, InMemoryService, Record};
    use crate::sync::condition::LiteralEvaluator;
    use crate::sync::counter::TaskCounter;
    use crate::sync::hooks::LoggingHookRunner;
    use crate::sync::policy::SyncPolicy;

    fn user(uid: &str) -> Record {
        Record::new(
            format!("uid={}", uid),
            Dataset::new().with("uid", &[uid]).with("cn", &[uid]),
        )
    }

    fn runner(
        source: Arc<InMemoryService>,
        destination: Arc<InMemoryService>,
        worker_count: usize,
    ) -> TaskRunner {
        let policy = Arc::new(SyncPolicy::from_entries([(
            "write_attributes".to_string(),
            "uid, cn".to_string(),
        )]));
        let orchestrator = Arc::new(TaskOrchestrator::new(
            "test",
            policy,
            source,
            destination,
            Arc::new(LiteralEvaluator),
            Arc::new(LoggingHookRunner),
            Arc::new(TaskCounter::new()),
        ));
        TaskRunner::new(orchestrator, worker_count, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn small_pool_still_processes_every_entry() {
        let source = Arc::new(InMemoryService::new("uid"));
        for i in 0..10 {
            source.insert(user(&format!("user{}", i)));
        }
        let destination = Arc::new(InMemoryService::new("uid"));
        let runner = runner(source, destination.clone(), 2);

        let snapshot = runner.run_synchronize().await.unwrap();

        assert_eq!(snapshot.seen, 10);
        assert_eq!(snapshot.applied + snapshot.failed, snapshot.changeable);
        assert!(snapshot.changeable <= 10);
        assert_eq!(destination.len(), 10);
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let source = Arc::new(InMemoryService::new("uid"));
        for i in 0..4 {
            source.insert(user(&format!("user{}", i)));
        }
        let destination = Arc::new(InMemoryService::new("uid"));
        let runner = runner(source, destination, 2);

        runner.run_synchronize().await.unwrap();
        let second = runner.run_synchronize().await.unwrap();

        assert_eq!(second.seen, 4);
        assert_eq!(second.changeable, 0);
        assert_eq!(second.applied, 0);
    }

    #[tokio::test]
    async fn lost_connection_fails_the_whole_run() {
        let source = Arc::new(InMemoryService::new("uid"));
        for i in 0..6 {
            source.insert(user(&format!("user{}", i)));
        }
        let destination = Arc::new(InMemoryService::new("uid"));
        destination.set_connection_lost(true);
        let runner = runner(source, destination, 2);

        let err = runner.run_synchronize().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn clean_run_removes_only_orphans() {
        let source = Arc::new(InMemoryService::new("uid").with_record(user("kept")));
        let destination = Arc::new(
            InMemoryService::new("uid")
                .with_record(user("kept"))
                .with_record(user("orphan")),
        );
        let runner = runner(source, destination.clone(), 2);

        let snapshot = runner.run_clean().await.unwrap();

        assert_eq!(snapshot.seen, 2);
        assert_eq!(snapshot.applied, 1);
        assert_eq!(destination.len(), 1);
        assert!(destination.record("uid=kept").is_some());
    }
}
