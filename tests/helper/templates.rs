//! Template and notifier fakes that record every call

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use template_versions::pipeline::{
    CancelHandle, Notifier, PipelineResult, TemplateError, TemplateUpdater, VersionMap,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateCalls {
    pub affected: Vec<VersionMap>,
    pub backups: Vec<Vec<PathBuf>>,
    pub restores: Vec<Vec<PathBuf>>,
    pub updates: Vec<VersionMap>,
    pub validations: Vec<PathBuf>,
}

/// Template updater reporting a fixed set of affected paths
#[derive(Default)]
pub struct RecordingTemplateUpdater {
    affected: Vec<PathBuf>,
    fail_updates: bool,
    fail_backups: bool,
    fail_validation: bool,
    cancel_on_update: Mutex<Option<CancelHandle>>,
    calls: Mutex<TemplateCalls>,
}

impl RecordingTemplateUpdater {
    pub fn new(affected: &[&str]) -> Self {
        Self {
            affected: affected.iter().map(PathBuf::from).collect(),
            ..Self::default()
        }
    }

    /// Every `update_all_templates` call fails
    pub fn failing_updates(mut self) -> Self {
        self.fail_updates = true;
        self
    }

    /// Every `backup_templates` call fails
    pub fn failing_backups(mut self) -> Self {
        self.fail_backups = true;
        self
    }

    pub fn failing_validation(mut self) -> Self {
        self.fail_validation = true;
        self
    }

    /// Cancel `handle` from inside the first `update_all_templates` call
    pub fn cancel_on_update(&self, handle: CancelHandle) {
        *self.cancel_on_update.lock().unwrap() = Some(handle);
    }

    pub fn calls(&self) -> TemplateCalls {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TemplateUpdater for RecordingTemplateUpdater {
    async fn get_affected_templates(&self, updates: &VersionMap) -> Result<Vec<PathBuf>, TemplateError> {
        self.calls.lock().unwrap().affected.push(updates.clone());
        Ok(self.affected.clone())
    }

    async fn backup_templates(&self, paths: &[PathBuf]) -> Result<(), TemplateError> {
        self.calls.lock().unwrap().backups.push(paths.to_vec());
        if self.fail_backups {
            return Err(TemplateError::Update("backup volume is read-only".to_string()));
        }
        Ok(())
    }

    async fn restore_templates(&self, paths: &[PathBuf]) -> Result<(), TemplateError> {
        self.calls.lock().unwrap().restores.push(paths.to_vec());
        Ok(())
    }

    async fn update_all_templates(&self, updates: &VersionMap) -> Result<(), TemplateError> {
        self.calls.lock().unwrap().updates.push(updates.clone());
        if let Some(handle) = self.cancel_on_update.lock().unwrap().take() {
            handle.cancel();
        }
        if self.fail_updates {
            return Err(TemplateError::Update("disk full".to_string()));
        }
        Ok(())
    }

    async fn validate_template(&self, path: &Path) -> Result<(), TemplateError> {
        self.calls.lock().unwrap().validations.push(path.to_path_buf());
        if self.fail_validation {
            return Err(TemplateError::Invalid {
                path: path.to_path_buf(),
                reason: "unexpected token".to_string(),
            });
        }
        Ok(())
    }
}

/// Notifier keeping every result it receives
#[derive(Default)]
pub struct RecordingNotifier {
    results: Mutex<Vec<PipelineResult>>,
}

impl RecordingNotifier {
    pub fn results(&self) -> Vec<PipelineResult> {
        self.results.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, result: &PipelineResult) {
        self.results.lock().unwrap().push(result.clone());
    }
}
