//! Asynchronous polling loop.
//!
//! One long-lived loop per task asks the source connector for the next
//! changed entry and submits it to the bounded pool, backing off with the
//! connector-declared interval when the source is idle. The loop exits on
//! an external stop signal or a fatal connector error, then drains in-flight
//! work under the same timeout policy as the synchronous runner.

use crate::connector::AsyncSourceService;
use crate::sync::error::SyncError;
use crate::sync::orchestrator::TaskOrchestrator;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Long-lived polling loop feeding the worker pool.
pub struct AsyncPoller {
    orchestrator: Arc<TaskOrchestrator>,
    source: Arc<dyn AsyncSourceService>,
    worker_count: usize,
    drain_timeout: Duration,
    stop: Arc<AtomicBool>,
}

impl AsyncPoller {
    /// Create a poller over the given async-capable source.
    pub fn new(
        orchestrator: Arc<TaskOrchestrator>,
        source: Arc<dyn AsyncSourceService>,
        worker_count: usize,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            source,
            worker_count: worker_count.max(1),
            drain_timeout,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared stop flag; setting it ends the loop after the current
    /// iteration.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// The orchestrator this poller feeds.
    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.orchestrator
    }

    /// Run the polling loop until stopped or the connector fails fatally.
    pub async fn run(&self) {
        self.orchestrator.counter().reset();
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        info!("poller started");

        while !self.stop.load(Ordering::Relaxed) {
            match self.source.next_changed_id().await {
                Ok(Some(pivot)) => {
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let orchestrator = self.orchestrator.clone();
                    let stop = self.stop.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = orchestrator.synchronize_entry(&pivot).await {
                            error!("stopping poller after fatal entry error: {}", e);
                            stop.store(true, Ordering::Relaxed);
                        }
                    });
                }
                Ok(None) => {
                    tokio::time::sleep(self.source.poll_interval()).await;
                }
                Err(e) => {
                    self.orchestrator.counter().inc_failed();
                    let e: SyncError = e.into();
                    if e.is_fatal() {
                        error!("poller terminating: {}", e);
                        break;
                    }
                    warn!("source polling failed: {}", e);
                    tokio::time::sleep(self.source.poll_interval()).await;
                }
            }
        }

        let drain = semaphore.acquire_many(self.worker_count as u32);
        if tokio::time::timeout(self.drain_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                "drain timed out after {:?}, abandoning in-flight jobs",
                self.drain_timeout
            );
        }
        info!(
            "poller stopped: {}",
            self.orchestrator.counter().snapshot().summary()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Dataset, InMemoryService, PivotId, Record};
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

    fn pivot(uid: &str) -> PivotId {
        PivotId::new(uid, Dataset::new().with("uid", &[uid]))
    }

    fn poller(
        source: Arc<InMemoryService>,
        destination: Arc<InMemoryService>,
    ) -> Arc<AsyncPoller> {
        let policy = Arc::new(SyncPolicy::from_entries([(
            "write_attributes".to_string(),
            "uid, cn".to_string(),
        )]));
        let orchestrator = Arc::new(TaskOrchestrator::new(
            "test",
            policy,
            source.clone(),
            destination,
            Arc::new(LiteralEvaluator),
            Arc::new(LoggingHookRunner),
            Arc::new(TaskCounter::new()),
        ));
        Arc::new(AsyncPoller::new(
            orchestrator,
            source,
            2,
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn idle_source_sleeps_without_submitting() {
        let source = Arc::new(
            InMemoryService::new("uid").with_poll_interval(Duration::from_millis(5)),
        );
        let destination = Arc::new(InMemoryService::new("uid"));
        let poller = poller(source.clone(), destination);
        let stop = poller.stop_flag();

        let running = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run().await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        stop.store(true, Ordering::Relaxed);
        running.await.unwrap();

        assert!(source.idle_polls() >= 2);
        let snapshot = poller.orchestrator().counter().snapshot();
        assert_eq!(snapshot.seen, 0);
    }

    #[tokio::test]
    async fn queued_changes_are_synchronized() {
        let source = Arc::new(
            InMemoryService::new("uid").with_poll_interval(Duration::from_millis(5)),
        );
        for uid in ["a", "b", "c"] {
            source.insert(user(uid));
            source.push_change(pivot(uid));
        }
        let destination = Arc::new(InMemoryService::new("uid"));
        let poller = poller(source, destination.clone());
        let stop = poller.stop_flag();

        let running = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.run().await })
        };
        tokio::time::sleep(Duration::from_millis(60)).await;
        stop.store(true, Ordering::Relaxed);
        running.await.unwrap();

        assert_eq!(destination.len(), 3);
        let snapshot = poller.orchestrator().counter().snapshot();
        assert_eq!(snapshot.seen, 3);
        assert_eq!(snapshot.applied, 3);
    }

    #[tokio::test]
    async fn lost_connection_terminates_with_one_failure() {
        let source = Arc::new(InMemoryService::new("uid"));
        source.set_connection_lost(true);
        let destination = Arc::new(InMemoryService::new("uid"));
        let poller = poller(source, destination);

        // terminates on its own, no stop signal needed
        poller.run().await;

        let snapshot = poller.orchestrator().counter().snapshot();
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.seen, 0);
    }
}
