//! Boundary to the component that owns template files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;
use thiserror::Error;

/// Approved updates handed to the template side, package name to new version
pub type VersionMap = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No backup for template {0:?}")]
    MissingBackup(PathBuf),

    #[error("Template {0:?} is outside the template root")]
    OutsideRoot(PathBuf),

    #[error("Template {path:?} is invalid: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("Template update failed: {0}")]
    Update(String),

    #[error("Invalid reference pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl TemplateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Operations the pipeline delegates to the template owner
///
/// The pipeline never reads template contents itself.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait TemplateUpdater: Send + Sync {
    /// Templates referencing any of the updated packages
    async fn get_affected_templates(&self, updates: &VersionMap) -> Result<Vec<PathBuf>, TemplateError>;

    async fn backup_templates(&self, paths: &[PathBuf]) -> Result<(), TemplateError>;

    /// Restore exactly `paths` from their backups
    async fn restore_templates(&self, paths: &[PathBuf]) -> Result<(), TemplateError>;

    /// Rewrite every template to the new versions
    async fn update_all_templates(&self, updates: &VersionMap) -> Result<(), TemplateError>;

    async fn validate_template(&self, path: &Path) -> Result<(), TemplateError>;
}
