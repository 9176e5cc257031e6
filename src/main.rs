mod connector;
mod sync;

use crate::connector::{Dataset, InMemoryService, Record};
use crate::sync::SyncManager;
use crate::sync::condition::LiteralEvaluator;
use crate::sync::config::TaskConfig;
use crate::sync::counter::TaskCounter;
use crate::sync::error::SyncError;
use crate::sync::hooks::LoggingHookRunner;
use crate::sync::orchestrator::TaskOrchestrator;
use crate::sync::policy::SyncPolicy;
use crate::sync::runner::TaskRunner;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::time())
        .init();

    let result = match std::env::args().nth(1) {
        Some(path) => run_from_config(&path).await,
        None => run_demo().await,
    };
    if let Err(e) = result {
        error!("synchronization failed: {}", e);
        std::process::exit(1);
    }
}

/// Load task configurations from a JSON file and run each one
/// synchronously.
async fn run_from_config(path: &str) -> Result<(), SyncError> {
    info!("loading tasks from {}", path);
    let content = std::fs::read_to_string(path)?;
    let configs: Vec<TaskConfig> = serde_json::from_str(&content)
        .map_err(|e| SyncError::Configuration(format!("cannot parse {}: {}", path, e)))?;

    let mut manager = SyncManager::new();
    for config in configs {
        manager.register(config)?;
    }

    let mut names = manager.task_names();
    names.sort();
    for name in names {
        let snapshot = manager.run_synchronous(&name).await?;
        info!("task {}: {}", name, snapshot.summary());
    }
    Ok(())
}

/// Built-in demonstration: an HR feed synchronized into a directory-shaped
/// destination, followed by a clean pass removing the leftover entry.
async fn run_demo() -> Result<(), SyncError> {
    info!("no configuration given, running the built-in demo task");

    let source = Arc::new(
        InMemoryService::new("uid")
            .with_record(employee("uid=ada", "ada", "Ada Lovelace", &["ada@example.com"]))
            .with_record(employee("uid=grace", "grace", "Grace Hopper", &[]))
            .with_record(employee("uid=alan", "alan", "Alan Turing", &["alan@example.com"])),
    );
    // one stale entry to update, one orphan for the clean pass
    let destination = Arc::new(
        InMemoryService::new("uid")
            .with_record(employee("uid=ada", "ada", "A. Lovelace", &["ada@example.com"]))
            .with_record(employee("uid=ghost", "ghost", "Leftover Account", &[])),
    );

    let policy = Arc::new(SyncPolicy::from_entries([
        ("write_attributes".to_string(), "uid, cn, mail".to_string()),
        ("mail.action".to_string(), "M".to_string()),
        ("mail.default_value".to_string(), "nobody@example.com".to_string()),
    ]));

    let orchestrator = Arc::new(TaskOrchestrator::new(
        "demo",
        policy,
        source,
        destination.clone(),
        Arc::new(LiteralEvaluator),
        Arc::new(LoggingHookRunner),
        Arc::new(TaskCounter::new()),
    ));
    let runner = TaskRunner::new(orchestrator, 4, Duration::from_secs(10));

    let synchronize = runner.run_synchronize().await?;
    info!("synchronize pass: {}", synchronize.summary());

    let clean = runner.run_clean().await?;
    info!("clean pass: {}", clean.summary());

    info!("destination now holds {} entries", destination.len());
    Ok(())
}

fn employee(main_id: &str, uid: &str, cn: &str, mail: &[&str]) -> Record {
    let mut attributes = Dataset::new().with("uid", &[uid]).with("cn", &[cn]);
    if !mail.is_empty() {
        attributes = attributes.with("mail", mail);
    }
    Record::new(main_id, attributes)
}
