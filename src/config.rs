use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::version::storage::StorageFormat;
use crate::version::types::VersionKind;

// =============================================================================
// Time-related constants
// =============================================================================

/// Default cache TTL in milliseconds (24 hours)
pub const DEFAULT_CACHE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Timeout for registry requests in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: i64 = 30_000;

/// Timeout for vulnerability database requests in milliseconds (10 seconds)
pub const SECURITY_TIMEOUT_MS: i64 = 10_000;

/// Quiet period after the last cache write before it is saved
pub const CACHE_SAVE_DEBOUNCE_MS: u64 = 500;

/// Upper bound between cache saves while writes keep arriving
pub const CACHE_SAVE_INTERVAL_MS: u64 = 30_000;

/// Apply attempts before the pipeline rolls back
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay between apply attempts
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

// =============================================================================
// File names
// =============================================================================

pub const CACHE_FILE_NAME: &str = "version_cache.json";
pub const STORE_FILE_NAME: &str = "versions.yaml";
pub const BACKUP_DIR_NAME: &str = "backups";
pub const USER_AGENT: &str = "template-versions";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub registries: RegistriesConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from a `.json`, `.yaml` or `.yml` file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
            _ => Ok(serde_json::from_str(&contents)?),
        }
    }
}

/// Version store location and format
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// Store file; defaults to `<data_dir>/versions.yaml`
    pub path: Option<PathBuf>,
    /// Overrides the format inferred from the file extension
    pub format: Option<StorageFormat>,
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(store_path)
    }
}

/// Cache-related configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Entry lifetime in milliseconds; non-positive means 24 hours
    pub ttl: i64,
    /// Persist entries to `<dir>/version_cache.json`
    pub persist: bool,
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL_MS,
            persist: true,
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(cache_dir)
    }
}

/// A package tracked through one registry
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedPackage {
    pub name: String,
    #[serde(default)]
    pub kind: VersionKind,
}

impl TrackedPackage {
    pub fn new(name: &str, kind: VersionKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// Registry-specific configuration
///
/// A registry section present in the config file replaces the default package list.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistriesConfig {
    pub npm: RegistryConfig,
    pub go_proxy: RegistryConfig,
    pub github: RegistryConfig,
    pub osv: OsvConfig,
}

impl Default for RegistriesConfig {
    fn default() -> Self {
        use VersionKind::{Framework, Language, Package};
        Self {
            npm: RegistryConfig::with_packages(&[
                ("react", Framework),
                ("vue", Framework),
                ("next", Framework),
                ("express", Framework),
                ("typescript", Language),
                ("vite", Package),
            ]),
            go_proxy: RegistryConfig::with_packages(&[
                ("github.com/gin-gonic/gin", Framework),
                ("github.com/labstack/echo/v4", Framework),
                ("gorm.io/gorm", Package),
                ("github.com/spf13/cobra", Package),
            ]),
            github: RegistryConfig::with_packages(&[
                ("nodejs/node", Language),
                ("denoland/deno", Language),
                ("oven-sh/bun", Language),
            ]),
            osv: OsvConfig::default(),
        }
    }
}

/// Individual registry configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    /// Request timeout in milliseconds
    pub timeout: i64,
    /// Bearer token, only used by the GitHub registry
    pub token: Option<String>,
    pub packages: Vec<TrackedPackage>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            timeout: FETCH_TIMEOUT_MS,
            token: None,
            packages: Vec::new(),
        }
    }
}

impl RegistryConfig {
    fn with_packages(packages: &[(&str, VersionKind)]) -> Self {
        Self {
            packages: packages
                .iter()
                .map(|(name, kind)| TrackedPackage::new(name, *kind))
                .collect(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        millis_or(self.timeout, FETCH_TIMEOUT_MS)
    }
}

/// Vulnerability database configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct OsvConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub timeout: i64,
}

impl Default for OsvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            timeout: SECURITY_TIMEOUT_MS,
        }
    }
}

impl OsvConfig {
    pub fn timeout(&self) -> Duration {
        millis_or(self.timeout, SECURITY_TIMEOUT_MS)
    }
}

/// Update pipeline behaviour
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    pub backup_enabled: bool,
    pub rollback_on_failure: bool,
    /// Total apply attempts, at least one
    pub max_retries: u32,
    /// Delay between apply attempts in milliseconds
    pub retry_delay: u64,
    pub validate_templates: bool,
    pub notifications_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backup_enabled: true,
            rollback_on_failure: true,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY_MS,
            validate_templates: true,
            notifications_enabled: true,
        }
    }
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

fn millis_or(value: i64, fallback: i64) -> Duration {
    let ms = if value > 0 { value } else { fallback };
    Duration::from_millis(ms as u64)
}

/// Returns the path to the data directory for template-versions.
/// Uses $XDG_DATA_HOME/template-versions if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/template-versions,
/// or ./template-versions if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the default path of the version store file.
pub fn store_path() -> PathBuf {
    data_dir().join(STORE_FILE_NAME)
}

/// Returns the default directory for the version cache file.
pub fn cache_dir() -> PathBuf {
    data_dir().join("cache")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("template-versions.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("template-versions")
}
