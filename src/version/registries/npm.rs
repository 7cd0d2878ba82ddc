//! npm registry API implementation

use std::collections::HashMap;
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

/// Default base URL for npm registry
pub const DEFAULT_BASE_URL: &str = "https://registry.npmjs.org";

/// Ecosystem name used by the vulnerability database
const OSV_ECOSYSTEM: &str = "npm";

/// Response from npm registry API
#[derive(Debug, Deserialize)]
struct NpmPackageResponse {
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
}

/// Registry implementation for npm registry API
pub struct NpmRegistry {
    client: reqwest::Client,
    base_url: String,
    packages: Vec<TrackedPackage>,
    osv: Option<Arc<OsvClient>>,
}

impl NpmRegistry {
    /// Creates a new NpmRegistry with a custom base URL
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

    /// Encode package name for URL (handles scoped packages)
    fn encode_package_name(package_name: &str) -> String {
        if package_name.starts_with('@') {
            // Scoped package: @scope/name -> @scope%2Fname
            package_name.replace('/', "%2F")
        } else {
            package_name.to_string()
        }
    }

    fn package_url(&self, package_name: &str) -> String {
        format!(
            "{}/{}",
            self.base_url,
            Self::encode_package_name(package_name)
        )
    }
}

#[async_trait::async_trait]
impl Registry for NpmRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Npm
    }

    fn supported_packages(&self) -> Vec<String> {
        self.packages.iter().map(|p| p.name.clone()).collect()
    }

    fn version_info(&self, package_name: &str, version: &str) -> VersionInfo {
        let mut info = VersionInfo::new(
            package_name,
            tracked_kind(&self.packages, package_name),
            "javascript",
            version,
        );
        info.update_source = RegistryKind::Npm.as_str().to_string();
        info.registry_url = self.package_url(package_name);
        info
    }

    async fn get_latest_version(&self, package_name: &str) -> Result<VersionInfo, RegistryError> {
        let url = self.package_url(package_name);

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, package_name, &url));
        }

        let package_info: NpmPackageResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse npm registry response: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        let latest = package_info
            .dist_tags
            .get("latest")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                RegistryError::InvalidResponse(format!(
                    "{} has no dist-tags.latest",
                    package_name
                ))
            })?;

        debug!("npm latest for {}: {}", package_name, latest);

        let mut info = self.version_info(package_name, latest);
        info.checked_at = Utc::now();
        if let Some(description) = package_info.description {
            info.metadata.insert("description".to_string(), description);
        }
        if let Some(homepage) = package_info.homepage {
            info.metadata.insert("homepage".to_string(), homepage);
        }
        Ok(info)
    }

    async fn check_security(
        &self,
        package_name: &str,
        version: &str,
    ) -> Result<Vec<SecurityIssue>, RegistryError> {
        match &self.osv {
            Some(osv) => Ok(osv.query(OSV_ECOSYSTEM, package_name, version).await),
            None => Ok(Vec::new()),
        }
    }

    async fn is_available(&self) -> bool {
        match self.client.get(format!("{}/", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("npm registry unavailable: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::types::VersionKind;
    use mockito::Server;

    fn registry(url: &str) -> NpmRegistry {
        NpmRegistry::new(
            url,
            vec![TrackedPackage::new("react", VersionKind::Framework)],
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn get_latest_version_reads_dist_tag_latest() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/react")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "name": "react",
                    "description": "React is a JavaScript library for building user interfaces.",
                    "dist-tags": { "latest": "18.2.0", "next": "19.0.0-rc.1" },
                    "versions": { "18.2.0": {}, "19.0.0-rc.1": {} }
                }"#,
            )
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry.get_latest_version("react").await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.name, "react");
        assert_eq!(result.latest_version, "18.2.0");
        assert_eq!(result.current_version, "18.2.0");
        assert_eq!(result.kind, VersionKind::Framework);
        assert_eq!(result.language, "javascript");
        assert_eq!(result.update_source, "npm");
        assert!(result.metadata.contains_key("description"));
    }

    #[tokio::test]
    async fn get_latest_version_returns_not_found_for_nonexistent_package() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/nonexistent-package")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "Not found"}"#)
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry.get_latest_version("nonexistent-package").await;

        mock.assert_async().await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn get_latest_version_fails_without_latest_tag() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/untagged")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "untagged", "dist-tags": {}}"#)
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry.get_latest_version("untagged").await;

        mock.assert_async().await;
        assert!(matches!(result, Err(RegistryError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn get_latest_version_handles_scoped_package() {
        let mut server = Server::new_async().await;

        // Scoped packages use URL encoding: @angular/core -> @angular%2Fcore
        let mock = server
            .mock("GET", "/@angular%2Fcore")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "@angular/core", "dist-tags": {"latest": "17.3.0"}}"#)
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry.get_latest_version("@angular/core").await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.latest_version, "17.3.0");
        assert_eq!(result.kind, VersionKind::Package);
    }

    #[tokio::test]
    async fn check_security_without_osv_reports_nothing() {
        let registry = registry("http://127.0.0.1:9");
        assert!(registry.check_security("react", "18.2.0").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_security_queries_osv_with_npm_ecosystem() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/v1/query")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "package": { "name": "express", "ecosystem": "npm" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"vulns": [{"id": "GHSA-rv95-896h-c2vc"}]}"#)
            .create_async()
            .await;

        let osv = Arc::new(OsvClient::new(&server.url(), Duration::from_secs(5)).unwrap());
        let registry = registry("http://127.0.0.1:9").with_osv(osv);
        let issues = registry.check_security("express", "4.17.0").await.unwrap();

        mock.assert_async().await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, "unknown");
    }

    #[tokio::test]
    async fn is_available_checks_registry_root() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let registry = registry(&server.url());
        assert!(registry.is_available().await);
        mock.assert_async().await;
    }

    #[test]
    fn supported_packages_lists_tracked_names() {
        let registry = registry("http://localhost");
        assert_eq!(registry.supported_packages(), vec!["react".to_string()]);
    }
}
