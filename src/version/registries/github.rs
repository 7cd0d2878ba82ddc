//! GitHub Releases API registry implementation

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::TrackedPackage;
use crate::version::error::RegistryError;
use crate::version::registries::{build_client, status_error, tracked_kind};
use crate::version::registry::{Registry, RegistryKind};
use crate::version::types::{SecurityIssue, VersionInfo};

/// Default base URL for GitHub API
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Response from GitHub Releases API
#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

/// Registry implementation for GitHub Releases API
pub struct GitHubRegistry {
    client: reqwest::Client,
    base_url: String,
    packages: Vec<TrackedPackage>,
    token: Option<String>,
}

impl GitHubRegistry {
    /// Creates a new GitHubRegistry with a custom base URL
    pub fn new(
        base_url: &str,
        packages: Vec<TrackedPackage>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            packages,
            token: None,
        })
    }

    /// Authenticate requests with a bearer token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl Registry for GitHubRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::GitHub
    }

    fn supported_packages(&self) -> Vec<String> {
        self.packages.iter().map(|p| p.name.clone()).collect()
    }

    fn version_info(&self, package_name: &str, version: &str) -> VersionInfo {
        // owner/repo: the repo segment names the runtime (node, deno, bun)
        let language = package_name.rsplit('/').next().unwrap_or(package_name);
        let mut info = VersionInfo::new(
            package_name,
            tracked_kind(&self.packages, package_name),
            language,
            version,
        );
        info.update_source = RegistryKind::GitHub.as_str().to_string();
        info.registry_url = format!("{}/repos/{}", self.base_url, package_name);
        info
    }

    async fn get_latest_version(&self, package_name: &str) -> Result<VersionInfo, RegistryError> {
        let url = format!("{}/repos/{}/releases/latest", self.base_url, package_name);

        let response = self.get(&url).send().await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(RegistryError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            return Err(status_error(status, package_name, &url));
        }

        let release: Release = response.json().await.map_err(|e| {
            warn!("Failed to parse GitHub release response: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        if release.tag_name.is_empty() {
            return Err(RegistryError::InvalidResponse(format!(
                "latest release of {} has no tag",
                package_name
            )));
        }

        debug!("GitHub latest release for {}: {}", package_name, release.tag_name);

        let mut info = self.version_info(package_name, &release.tag_name);
        info.checked_at = Utc::now();
        if let Some(html_url) = release.html_url {
            info.metadata.insert("release_url".to_string(), html_url);
        }
        if let Some(published_at) = release.published_at {
            info.metadata.insert("published".to_string(), published_at);
        }
        Ok(info)
    }

    async fn check_security(
        &self,
        _package_name: &str,
        _version: &str,
    ) -> Result<Vec<SecurityIssue>, RegistryError> {
        Ok(Vec::new())
    }

    async fn is_available(&self) -> bool {
        match self.get(&format!("{}/rate_limit", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("GitHub API unavailable: {}", e);
                false
            }
        }
    }
}
