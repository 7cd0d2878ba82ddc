//! Go proxy registry API implementation

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::TrackedPackage;
use crate::version::error::RegistryError;
use crate::version::registries::{OsvClient, build_client, status_error, tracked_kind};
use crate::version::registry::{Registry, RegistryKind};
use crate::version::types::{SecurityIssue, VersionInfo};

/// Default base URL for Go proxy
pub const DEFAULT_BASE_URL: &str = "https://proxy.golang.org";

/// Ecosystem name used by the vulnerability database
const OSV_ECOSYSTEM: &str = "Go";

/// Response from `/@latest`
#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "Time", default)]
    time: Option<String>,
}

/// Registry implementation for Go proxy API
pub struct GoProxyRegistry {
    client: reqwest::Client,
    base_url: String,
    packages: Vec<TrackedPackage>,
    osv: Option<Arc<OsvClient>>,
}

impl GoProxyRegistry {
    /// Creates a new GoProxyRegistry with a custom base URL
    pub fn new(
        base_url: &str,
        packages: Vec<TrackedPackage>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            packages,
            osv: None,
        })
    }

    /// Enables vulnerability lookups through OSV
    pub fn with_osv(mut self, osv: Arc<OsvClient>) -> Self {
        self.osv = Some(osv);
        self
    }

    async fn fetch_latest(&self, encoded_module: &str) -> Option<LatestResponse> {
        let url = format!("{}/{}/@latest", self.base_url, encoded_module);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Go proxy @latest request failed for {}: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!("Go proxy @latest returned {} for {}", response.status(), url);
            return None;
        }

        match response.json::<LatestResponse>().await {
            Ok(latest) if !latest.version.is_empty() => Some(latest),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to parse Go proxy @latest response: {}", e);
                None
            }
        }
    }

    async fn fetch_from_list(
        &self,
        module: &str,
        encoded_module: &str,
    ) -> Result<String, RegistryError> {
        let url = format!("{}/{}/@v/list", self.base_url, encoded_module);

        let response = self.client.get(&url).send().await?;

        // Go proxy returns 404 or 410 for modules that don't exist
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, module, &url));
        }

        let body = response.text().await.map_err(|e| {
            warn!("Failed to read Go proxy response: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        // Versions one per line, unordered
        body.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .max()
            .map(str::to_string)
            .ok_or_else(|| RegistryError::NotFound(module.to_string()))
    }
}

#[async_trait::async_trait]
impl Registry for GoProxyRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::GoProxy
    }

    fn supported_packages(&self) -> Vec<String> {
        self.packages.iter().map(|p| p.name.clone()).collect()
    }

    fn version_info(&self, package_name: &str, version: &str) -> VersionInfo {
        let mut info = VersionInfo::new(
            package_name,
            tracked_kind(&self.packages, package_name),
            "go",
            version,
        );
        info.update_source = RegistryKind::GoProxy.as_str().to_string();
        info.registry_url = format!("{}/{}", self.base_url, encode_module_path(package_name));
        info
    }

    async fn get_latest_version(&self, package_name: &str) -> Result<VersionInfo, RegistryError> {
        // Go proxy expects module path to be URL-encoded, with uppercase letters
        // escaped as !{lowercase}. For example: github.com/Azure -> github.com/!azure
        let encoded_module = encode_module_path(package_name);

        let (version, time) = match self.fetch_latest(&encoded_module).await {
            Some(latest) => (latest.version, latest.time),
            None => (
                self.fetch_from_list(package_name, &encoded_module).await?,
                None,
            ),
        };

        debug!("Go proxy latest for {}: {}", package_name, version);

        let mut info = self.version_info(package_name, &version);
        info.checked_at = Utc::now();
        if let Some(time) = time {
            info.metadata.insert("published".to_string(), time);
        }
        Ok(info)
    }

    async fn check_security(
        &self,
        package_name: &str,
        version: &str,
    ) -> Result<Vec<SecurityIssue>, RegistryError> {
        match &self.osv {
            Some(osv) => {
                let version = version.strip_prefix('v').unwrap_or(version);
                Ok(osv.query(OSV_ECOSYSTEM, package_name, version).await)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn is_available(&self) -> bool {
        match self.client.get(format!("{}/", self.base_url)).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                warn!("Go proxy unavailable: {}", e);
                false
            }
        }
    }
}

/// Encodes a Go module path for use in proxy URLs.
/// Uppercase letters are escaped as !{lowercase}.
fn encode_module_path(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            result.push('!');
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
