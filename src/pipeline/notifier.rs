//! Run summaries

#[cfg(test)]
use mockall::automock;
use tracing::{info, warn};

use crate::pipeline::result::PipelineResult;

/// Receives the result of every pipeline run; cannot affect its outcome
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, result: &PipelineResult);
}

/// Writes the run summary to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, result: &PipelineResult) {
        if result.success {
            info!("Update pipeline finished: {}", result.summary());
        } else {
            warn!("Update pipeline failed: {}", result.summary());
        }

        for (name, version) in &result.approved {
            info!("  approved {} -> {}", name, version);
        }
        for skipped in &result.skipped {
            info!("  skipped {}: {}", skipped.name, skipped.reason);
        }
        for warning in &result.warnings {
            warn!("  {}", warning);
        }
        for error in &result.errors {
            warn!("  error: {}", error);
        }
    }
}
