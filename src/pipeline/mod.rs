//! Update pipeline
//!
//! One run moves strictly forward through these steps:
//!
//! ```text
//! detect -> analyze -> approve -> identify -> backup -> apply (retry) -> validate -> notify
//!                                                          │
//!                                                          └─ final failure -> rollback
//! ```
//!
//! A [`PipelineResult`] is produced on every path, including failures, so the
//! caller can always see how far the run got.

pub mod fs_template;
pub mod notifier;
pub mod result;
pub mod template;

pub use fs_template::FsTemplateUpdater;
pub use notifier::{LogNotifier, Notifier};
pub use result::{PipelineOutcome, PipelineResult, SkippedUpdate};
pub use template::{TemplateError, TemplateUpdater, VersionMap};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::version::error::{ManagerError, StorageError};
use crate::version::manager::{DetectedUpdate, VersionManager};
use crate::version::types::UpdatePolicy;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Update detection failed: {0}")]
    Detection(#[source] ManagerError),

    #[error("Could not identify affected templates: {0}")]
    Identify(#[source] TemplateError),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Failed to record update of {name}: {source}")]
    Record {
        name: String,
        #[source]
        source: ManagerError,
    },

    #[error("Template update failed after {attempts} attempt(s): {source}")]
    Apply {
        attempts: u32,
        #[source]
        source: TemplateError,
    },

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A failed run: the error plus everything the run recorded before failing
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PipelineFailure {
    #[source]
    pub error: PipelineError,
    pub result: PipelineResult,
}

/// Cooperative cancellation, checked between steps and between apply attempts
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Policy verdict for a single detected update
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Approve,
    Reject(&'static str),
}

fn decide(update: &DetectedUpdate, policy: &UpdatePolicy) -> Decision {
    if update.is_security_update() && policy.security_priority {
        Decision::Approve
    } else if update.is_breaking && policy.breaking_change_approval {
        Decision::Reject("breaking change requires manual approval")
    } else if policy.auto_update {
        Decision::Approve
    } else {
        Decision::Reject("automatic updates are disabled")
    }
}

/// What step 5 managed to save
#[derive(Debug, Default)]
struct Backups {
    templates: Vec<PathBuf>,
    store: Option<PathBuf>,
}

impl Backups {
    fn is_empty(&self) -> bool {
        self.templates.is_empty() && self.store.is_none()
    }
}

pub struct UpdatePipeline {
    manager: Arc<VersionManager>,
    templates: Arc<dyn TemplateUpdater>,
    notifier: Option<Arc<dyn Notifier>>,
    config: PipelineConfig,
    cancel: CancelHandle,
}

impl UpdatePipeline {
    pub fn new(
        manager: Arc<VersionManager>,
        templates: Arc<dyn TemplateUpdater>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            manager,
            templates,
            notifier: None,
            config,
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Handle that cancels this pipeline's runs
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline once
    pub async fn execute(&self) -> Result<PipelineResult, PipelineFailure> {
        let started = Instant::now();
        let mut result = PipelineResult::started(Utc::now());
        info!("Update pipeline started");

        let outcome = self.run(&mut result).await;
        result.duration = started.elapsed();

        let outcome = match outcome {
            Ok(outcome) => {
                result.outcome = outcome;
                result.success = true;
                Ok(())
            }
            Err(e) => {
                result.outcome = if result.rollback_performed {
                    PipelineOutcome::RolledBack
                } else {
                    PipelineOutcome::FailedWithoutRollback
                };
                result.success = false;
                result.errors.push(e.to_string());
                error!("Update pipeline failed: {}", e);
                Err(e)
            }
        };

        if self.config.notifications_enabled
            && let Some(notifier) = &self.notifier
        {
            notifier.notify(&result).await;
        }

        match outcome {
            Ok(()) => Ok(result),
            Err(error) => Err(PipelineFailure { error, result }),
        }
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            warn!("Update pipeline cancelled");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    async fn run(&self, result: &mut PipelineResult) -> Result<PipelineOutcome, PipelineError> {
        // Detect
        self.check_cancelled()?;
        let report = self
            .manager
            .detect_version_updates()
            .await
            .map_err(PipelineError::Detection)?;

        for skipped in &report.skipped {
            let name = skipped.name.as_deref().unwrap_or(skipped.registry.as_str());
            result.skip(name, skipped.reason.clone());
        }

        result.updates_detected = report.updates.len();
        if report.updates.is_empty() {
            info!("No updates detected");
            return Ok(PipelineOutcome::NoUpdates);
        }

        // Analyze
        result.security_updates = report
            .updates
            .iter()
            .filter(|u| u.is_security_update())
            .count();
        result.breaking_changes = report.updates.iter().filter(|u| u.is_breaking).count();

        // Approve
        let policy = self.manager.storage().update_policy()?;
        let mut approved: Vec<&DetectedUpdate> = Vec::new();
        for update in &report.updates {
            match decide(update, &policy) {
                Decision::Approve => {
                    debug!(
                        "Approved {} {} -> {}",
                        update.name, update.current_version, update.latest_version
                    );
                    approved.push(update);
                }
                Decision::Reject(reason) => {
                    result.warnings.push(format!(
                        "{} {} -> {} not applied: {}",
                        update.name, update.current_version, update.latest_version, reason
                    ));
                    result.skip(&update.name, reason);
                }
            }
        }

        result.updates_approved = approved.len();
        result.approved = approved
            .iter()
            .map(|u| (u.name.clone(), u.latest_version.clone()))
            .collect();
        if approved.is_empty() {
            info!("No updates approved by policy");
            return Ok(PipelineOutcome::NothingApproved);
        }

        // Identify
        self.check_cancelled()?;
        let affected = self
            .templates
            .get_affected_templates(&result.approved)
            .await
            .map_err(PipelineError::Identify)?;
        info!("{} templates affected", affected.len());
        result.affected_templates = affected.clone();

        // Backup
        self.check_cancelled()?;
        let backups = if self.config.backup_enabled {
            self.backup(&affected, result).await?
        } else {
            Backups::default()
        };

        // Apply
        self.check_cancelled()?;
        for update in &approved {
            if let Err(source) =
                self.manager
                    .update_version_info(&update.name, &update.latest_version, update.is_breaking)
            {
                let error = PipelineError::Record {
                    name: update.name.clone(),
                    source,
                };
                self.rollback(&backups, result).await;
                return Err(error);
            }
        }

        self.apply_templates(&backups, result).await?;
        result.updates_applied = approved.len();

        // Validate
        if self.config.validate_templates {
            for path in &affected {
                if let Err(e) = self.templates.validate_template(path).await {
                    warn!("Template {:?} failed validation: {}", path, e);
                    result.warnings.push(format!("validation of {:?} failed: {}", path, e));
                }
            }
        }

        info!("Applied {} updates", result.updates_applied);
        Ok(PipelineOutcome::Applied)
    }

    async fn backup(
        &self,
        affected: &[PathBuf],
        result: &mut PipelineResult,
    ) -> Result<Backups, PipelineError> {
        let mut backups = Backups::default();
        let mut failures = Vec::new();

        if !affected.is_empty() {
            match self.templates.backup_templates(affected).await {
                Ok(()) => backups.templates = affected.to_vec(),
                Err(e) => failures.push(format!("templates: {}", e)),
            }
        }

        match self.manager.storage().backup() {
            Ok(path) => {
                result.store_backup = Some(path.clone());
                backups.store = Some(path);
            }
            Err(e) => failures.push(format!("version store: {}", e)),
        }

        if failures.is_empty() {
            return Ok(backups);
        }

        let message = failures.join("; ");
        if self.config.rollback_on_failure {
            return Err(PipelineError::Backup(message));
        }
        warn!("Backup incomplete, continuing: {}", message);
        result.warnings.push(format!("backup incomplete: {}", message));
        Ok(backups)
    }

    async fn apply_templates(
        &self,
        backups: &Backups,
        result: &mut PipelineResult,
    ) -> Result<(), PipelineError> {
        let attempts = self.config.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.templates.update_all_templates(&result.approved).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if attempt >= attempts {
                error!("Template update failed after {} attempts: {}", attempt, error);
                self.rollback(backups, result).await;
                return Err(PipelineError::Apply {
                    attempts: attempt,
                    source: error,
                });
            }

            warn!(
                "Template update attempt {}/{} failed: {}",
                attempt, attempts, error
            );
            sleep(self.config.retry_delay()).await;

            if let Err(cancelled) = self.check_cancelled() {
                self.rollback(backups, result).await;
                return Err(cancelled);
            }
        }
    }

    async fn rollback(&self, backups: &Backups, result: &mut PipelineResult) {
        if !self.config.rollback_on_failure {
            warn!("Rollback disabled, leaving changes in place");
            return;
        }
        if backups.is_empty() {
            warn!("Nothing to roll back to");
            return;
        }

        info!("Rolling back");
        let mut restored = true;

        if !backups.templates.is_empty()
            && let Err(e) = self.templates.restore_templates(&backups.templates).await
        {
            error!("Failed to restore templates: {}", e);
            result.errors.push(format!("template restore failed: {}", e));
            restored = false;
        }

        if let Some(store) = &backups.store
            && let Err(e) = self.restore_store(store)
        {
            error!("Failed to restore version store: {}", e);
            result.errors.push(format!("version store restore failed: {}", e));
            restored = false;
        }

        result.rollback_performed = restored;
    }

    fn restore_store(&self, backup: &Path) -> Result<(), StorageError> {
        self.manager.storage().restore(backup)
    }
}
