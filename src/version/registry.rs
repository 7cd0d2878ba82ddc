//! Registry trait for fetching latest versions from package ecosystems

#[cfg(test)]
use mockall::automock;

use crate::version::error::RegistryError;
use crate::version::types::{SecurityIssue, VersionInfo};

/// Ecosystem served by a registry implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistryKind {
    /// npm registry (registry.npmjs.org)
    Npm,
    /// Go module proxy (proxy.golang.org)
    GoProxy,
    /// GitHub releases (api.github.com)
    GitHub,
}

impl RegistryKind {
    pub const ALL: [RegistryKind; 3] = [RegistryKind::Npm, RegistryKind::GoProxy, RegistryKind::GitHub];

    /// Returns the string representation of the registry kind
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::Npm => "npm",
            RegistryKind::GoProxy => "go_proxy",
            RegistryKind::GitHub => "github",
        }
    }
}

impl std::fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegistryKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(RegistryKind::Npm),
            "go_proxy" => Ok(RegistryKind::GoProxy),
            "github" => Ok(RegistryKind::GitHub),
            _ => Err(()),
        }
    }
}

/// Trait for querying one ecosystem's registry
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Returns the kind of registry this implementation handles
    fn kind(&self) -> RegistryKind;

    /// Names of the packages this registry is configured to track
    fn supported_packages(&self) -> Vec<String>;

    /// Builds the record this registry reports for `package_name` at `version`
    ///
    /// Used both for fresh registry answers and for versions served from cache.
    fn version_info(&self, package_name: &str, version: &str) -> VersionInfo;

    /// Fetches the latest published version of a package
    ///
    /// # Returns
    /// * `Ok(VersionInfo)` - record with `current_version` and `latest_version` set to the latest
    /// * `Err(RegistryError)` - if the package is unknown or the registry misbehaves
    async fn get_latest_version(&self, package_name: &str) -> Result<VersionInfo, RegistryError>;

    /// Known vulnerabilities for `version`; lookup failures yield an empty list
    async fn check_security(
        &self,
        package_name: &str,
        version: &str,
    ) -> Result<Vec<SecurityIssue>, RegistryError>;

    /// Whether the registry answers at all
    async fn is_available(&self) -> bool;
}
