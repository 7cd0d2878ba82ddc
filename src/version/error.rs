use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version: {0:?}")]
    InvalidVersion(String),

    #[error("Invalid constraint: {0:?}")]
    InvalidConstraint(String),

    #[error("No versions to compare")]
    Empty,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Version info not found: {0}")]
    NotFound(String),

    #[error("Backup not found: {0:?}")]
    BackupNotFound(PathBuf),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Package not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Registry not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompatibilityError {
    #[error("Rule for {package} has invalid version {version:?}: {source}")]
    InvalidRuleVersion {
        package: String,
        version: String,
        #[source]
        source: VersionError,
    },

    #[error("Rule for {package} has invalid constraint on {dependency}: {source}")]
    InvalidRuleConstraint {
        package: String,
        dependency: String,
        #[source]
        source: VersionError,
    },
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
