//! Registry implementations for fetching latest versions

pub mod github;
pub mod go_proxy;
pub mod npm;
pub mod osv;

pub use github::GitHubRegistry;
pub use go_proxy::GoProxyRegistry;
pub use npm::NpmRegistry;
pub use osv::OsvClient;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{RegistriesConfig, TrackedPackage, USER_AGENT};
use crate::version::error::RegistryError;
use crate::version::registry::{Registry, RegistryKind};
use crate::version::types::VersionKind;

/// Build an HTTP client owned by a single registry
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, RegistryError> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Kind configured for a tracked package, `Package` when it is not tracked
pub(crate) fn tracked_kind(packages: &[TrackedPackage], name: &str) -> VersionKind {
    packages
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.kind)
        .unwrap_or_default()
}

/// Map a non-success status to the matching registry error
pub(crate) fn status_error(
    status: reqwest::StatusCode,
    package_name: &str,
    url: &str,
) -> RegistryError {
    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
        return RegistryError::NotFound(package_name.to_string());
    }
    tracing::warn!("Registry returned status {}: {}", status, url);
    RegistryError::InvalidResponse(format!("Unexpected status: {}", status))
}

/// Instantiate every enabled registry from configuration
pub fn from_config(
    config: &RegistriesConfig,
) -> Result<HashMap<RegistryKind, Arc<dyn Registry>>, RegistryError> {
    let osv = if config.osv.enabled {
        let base_url = config.osv.base_url.as_deref().unwrap_or(osv::DEFAULT_BASE_URL);
        Some(Arc::new(OsvClient::new(base_url, config.osv.timeout())?))
    } else {
        None
    };

    let mut registries: HashMap<RegistryKind, Arc<dyn Registry>> = HashMap::new();

    if config.npm.enabled {
        let base_url = config.npm.base_url.as_deref().unwrap_or(npm::DEFAULT_BASE_URL);
        let mut registry =
            NpmRegistry::new(base_url, config.npm.packages.clone(), config.npm.timeout())?;
        if let Some(osv) = &osv {
            registry = registry.with_osv(osv.clone());
        }
        registries.insert(RegistryKind::Npm, Arc::new(registry));
    }

    if config.go_proxy.enabled {
        let base_url = config
            .go_proxy
            .base_url
            .as_deref()
            .unwrap_or(go_proxy::DEFAULT_BASE_URL);
        let mut registry = GoProxyRegistry::new(
            base_url,
            config.go_proxy.packages.clone(),
            config.go_proxy.timeout(),
        )?;
        if let Some(osv) = &osv {
            registry = registry.with_osv(osv.clone());
        }
        registries.insert(RegistryKind::GoProxy, Arc::new(registry));
    }

    if config.github.enabled {
        let base_url = config
            .github
            .base_url
            .as_deref()
            .unwrap_or(github::DEFAULT_BASE_URL);
        let mut registry = GitHubRegistry::new(
            base_url,
            config.github.packages.clone(),
            config.github.timeout(),
        )?;
        if let Some(token) = &config.github.token {
            registry = registry.with_token(token);
        }
        registries.insert(RegistryKind::GitHub, Arc::new(registry));
    }

    info!(
        "Configured registries: {:?}",
        registries.keys().map(|k| k.as_str()).collect::<Vec<_>>()
    );
    Ok(registries)
}
