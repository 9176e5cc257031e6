//! Post-operation hooks.
//!
//! After a successful apply, a task may run a user-supplied hook with the
//! modification that was written. Hooks are fire-and-forget from the
//! orchestrator's point of view: failures are logged and never undo or
//! block the applied count.

use crate::connector::Modification;
use crate::sync::error::SyncError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Rendering format handed to the hook alongside the modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookFormat {
    Ldif,
    Json,
}

/// Runs a post-operation hook script.
#[async_trait::async_trait]
pub trait HookRunner: Send + Sync {
    /// Invoke the hook with the applied modification.
    async fn run(
        &self,
        script: &str,
        format: HookFormat,
        modification: &Modification,
    ) -> Result<(), SyncError>;
}

/// Hook runner that only logs the invocation.
///
/// Stands in when no process execution is wired into the deployment; the
/// JSON rendering it logs is the payload a real runner would hand over.
pub struct LoggingHookRunner;

#[async_trait::async_trait]
impl HookRunner for LoggingHookRunner {
    async fn run(
        &self,
        script: &str,
        format: HookFormat,
        modification: &Modification,
    ) -> Result<(), SyncError> {
        let payload = match format {
            HookFormat::Json => serde_json::to_string(modification)
                .map_err(|e| SyncError::Configuration(format!("hook payload: {}", e)))?,
            HookFormat::Ldif => format!(
                "dn: {}\nchangetype: {}",
                modification.main_id, modification.operation
            ),
        };
        info!(
            "hook {} for {} on {}: {}",
            script, modification.operation, modification.main_id, payload
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::SyncOperation;

    #[tokio::test]
    async fn logging_runner_accepts_both_formats() {
        let runner = LoggingHookRunner;
        let modification = Modification::new(SyncOperation::Create, "uid=u");
        runner
            .run("hooks/created.sh", HookFormat::Json, &modification)
            .await
            .unwrap();
        runner
            .run("hooks/created.sh", HookFormat::Ldif, &modification)
            .await
            .unwrap();
    }
}
