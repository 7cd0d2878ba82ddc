//! Per-run pipeline accounting

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Terminal state of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// No registry reported a newer version
    NoUpdates,
    /// Updates were found but policy approved none of them
    NothingApproved,
    Applied,
    /// Apply failed and backups were restored
    RolledBack,
    /// Failed with nothing restored
    FailedWithoutRollback,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PipelineOutcome::NoUpdates | PipelineOutcome::NothingApproved | PipelineOutcome::Applied
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineOutcome::NoUpdates => "no updates",
            PipelineOutcome::NothingApproved => "nothing approved",
            PipelineOutcome::Applied => "applied",
            PipelineOutcome::RolledBack => "rolled back",
            PipelineOutcome::FailedWithoutRollback => "failed without rollback",
        }
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An update (or package) the run did not apply, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedUpdate {
    pub name: String,
    pub reason: String,
}

/// Everything observable about one run, returned on success and failure alike
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub success: bool,
    pub outcome: PipelineOutcome,
    pub updates_detected: usize,
    pub updates_approved: usize,
    pub updates_applied: usize,
    pub security_updates: usize,
    pub breaking_changes: usize,
    /// Approved package name to new version
    pub approved: BTreeMap<String, String>,
    pub skipped: Vec<SkippedUpdate>,
    pub affected_templates: Vec<PathBuf>,
    pub store_backup: Option<PathBuf>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub rollback_performed: bool,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl PipelineResult {
    pub(crate) fn started(at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            outcome: PipelineOutcome::FailedWithoutRollback,
            updates_detected: 0,
            updates_approved: 0,
            updates_applied: 0,
            security_updates: 0,
            breaking_changes: 0,
            approved: BTreeMap::new(),
            skipped: Vec::new(),
            affected_templates: Vec::new(),
            store_backup: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            rollback_performed: false,
            started_at: at,
            duration: Duration::ZERO,
        }
    }

    pub(crate) fn skip(&mut self, name: &str, reason: impl Into<String>) {
        self.skipped.push(SkippedUpdate {
            name: name.to_string(),
            reason: reason.into(),
        });
    }

    /// One-line summary for logs and notifications
    pub fn summary(&self) -> String {
        format!(
            "{}: {} detected, {} approved, {} applied ({} security, {} breaking), {} skipped, {} warnings, {} errors",
            self.outcome,
            self.updates_detected,
            self.updates_approved,
            self.updates_applied,
            self.security_updates,
            self.breaking_changes,
            self.skipped.len(),
            self.warnings.len(),
            self.errors.len()
        )
    }
}
