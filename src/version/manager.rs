//! Facade over storage, cache and registries
//!
//! Detection never aborts on a single package: registry failures, unavailable
//! registries and unparsable versions end up in [`DetectionReport::skipped`].
//! Storage failures are the only errors that stop a detection pass.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::version::cache::{VersionCache, cache_key};
use crate::version::error::{ManagerError, RegistryError};
use crate::version::registry::{Registry, RegistryKind};
use crate::version::semver::{self, SemVer, is_breaking_change};
use crate::version::storage::VersionStorage;
use crate::version::types::{SecurityIssue, VersionInfo, VersionKind};

/// A tracked package whose registry reports a strictly newer version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedUpdate {
    pub name: String,
    pub kind: VersionKind,
    pub language: String,
    pub registry: RegistryKind,
    pub current_version: String,
    pub latest_version: String,
    /// Known issues affecting `current_version`
    pub security_issues: Vec<SecurityIssue>,
    pub is_breaking: bool,
}

impl DetectedUpdate {
    pub fn is_security_update(&self) -> bool {
        !self.security_issues.is_empty()
    }
}

/// A package (or a whole registry when `name` is `None`) left out of detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPackage {
    pub registry: RegistryKind,
    pub name: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    pub updates: Vec<DetectedUpdate>,
    pub skipped: Vec<SkippedPackage>,
    /// Names recorded in storage for the first time during this pass
    pub first_seen: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub name: String,
    pub previous_version: String,
    pub new_version: String,
    pub is_breaking: bool,
    pub updated_at: DateTime<Utc>,
}

pub struct VersionManager {
    storage: Arc<VersionStorage>,
    cache: Arc<dyn VersionCache>,
    registries: HashMap<RegistryKind, Arc<dyn Registry>>,
}

type RegistryOutcome = Result<Vec<(String, Result<VersionInfo, RegistryError>)>, String>;

impl VersionManager {
    pub fn new(
        storage: Arc<VersionStorage>,
        cache: Arc<dyn VersionCache>,
        registries: HashMap<RegistryKind, Arc<dyn Registry>>,
    ) -> Self {
        Self {
            storage,
            cache,
            registries,
        }
    }

    pub fn storage(&self) -> &Arc<VersionStorage> {
        &self.storage
    }

    pub fn cache(&self) -> &Arc<dyn VersionCache> {
        &self.cache
    }

    pub fn registry(&self, kind: RegistryKind) -> Option<&Arc<dyn Registry>> {
        self.registries.get(&kind)
    }

    /// Registries in a stable order
    fn sorted_registries(&self) -> Vec<(RegistryKind, &Arc<dyn Registry>)> {
        let mut registries: Vec<_> = self.registries.iter().map(|(k, r)| (*k, r)).collect();
        registries.sort_by_key(|(kind, _)| *kind);
        registries
    }

    /// Latest version of one package, served from cache when possible
    async fn latest_for(
        &self,
        registry: &dyn Registry,
        package_name: &str,
    ) -> Result<VersionInfo, RegistryError> {
        let key = cache_key(registry.kind().as_str(), package_name);

        if let Some(version) = self.cache.get(&key) {
            debug!("Cache hit for {}: {}", key, version);
            return Ok(registry.version_info(package_name, &version));
        }

        let info = registry.get_latest_version(package_name).await?;
        if let Err(e) = self.cache.set(&key, &info.latest_version) {
            warn!("Failed to cache {}: {}", key, e);
        }
        Ok(info)
    }

    async fn query_registry(&self, registry: &Arc<dyn Registry>, check_available: bool) -> RegistryOutcome {
        if check_available && !registry.is_available().await {
            return Err("registry unavailable".to_string());
        }

        let lookups = registry.supported_packages().into_iter().map(|name| async move {
            let result = self.latest_for(registry.as_ref(), &name).await;
            (name, result)
        });

        Ok(join_all(lookups).await)
    }

    /// Latest version of every supported package across all registries, keyed by name
    ///
    /// Packages whose lookup fails are logged and left out.
    pub async fn check_latest_versions(&self) -> BTreeMap<String, VersionInfo> {
        let registries = self.sorted_registries();
        let queries = registries
            .iter()
            .map(|(_, registry)| self.query_registry(registry, false));

        let mut latest = BTreeMap::new();
        for ((kind, _), outcome) in registries.iter().zip(join_all(queries).await) {
            for (name, result) in outcome.unwrap_or_default() {
                match result {
                    Ok(info) => {
                        latest.insert(name, info);
                    }
                    Err(e) => warn!("Failed to fetch latest version of {}/{}: {}", kind, name, e),
                }
            }
        }
        latest
    }

    /// Compare every supported package against its stored record
    pub async fn detect_version_updates(&self) -> Result<DetectionReport, ManagerError> {
        let registries = self.sorted_registries();
        let queries = registries
            .iter()
            .map(|(_, registry)| self.query_registry(registry, true));
        let outcomes = join_all(queries).await;

        let mut report = DetectionReport::default();

        for ((kind, registry), outcome) in registries.into_iter().zip(outcomes) {
            let results = match outcome {
                Ok(results) => results,
                Err(reason) => {
                    warn!("Skipping {} registry: {}", kind, reason);
                    report.skipped.push(SkippedPackage {
                        registry: kind,
                        name: None,
                        reason,
                    });
                    continue;
                }
            };

            for (name, result) in results {
                match result {
                    Ok(latest) => {
                        self.classify(kind, registry.as_ref(), latest, &mut report)
                            .await?
                    }
                    Err(e) => {
                        warn!("Skipping {}/{}: {}", kind, name, e);
                        report.skipped.push(SkippedPackage {
                            registry: kind,
                            name: Some(name),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            "Detected {} updates ({} skipped, {} new)",
            report.updates.len(),
            report.skipped.len(),
            report.first_seen.len()
        );
        Ok(report)
    }

    async fn classify(
        &self,
        kind: RegistryKind,
        registry: &dyn Registry,
        latest: VersionInfo,
        report: &mut DetectionReport,
    ) -> Result<(), ManagerError> {
        let name = latest.name.clone();

        let Some(stored) = self.storage.get_version_info(&name)? else {
            info!("First sighting of {} at {}", name, latest.latest_version);
            let mut record = latest;
            record.current_version = record.latest_version.clone();
            self.storage.set_version_info(record)?;
            report.first_seen.push(name);
            return Ok(());
        };

        let ordering = match semver::compare_versions(&latest.latest_version, &stored.current_version) {
            Ok(ordering) => ordering,
            Err(e) => {
                warn!("Cannot compare versions of {}: {}", name, e);
                report.skipped.push(SkippedPackage {
                    registry: kind,
                    name: Some(name),
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        let newer = ordering == Ordering::Greater;
        let issues = if newer {
            match registry.check_security(&name, &stored.current_version).await {
                Ok(issues) => Some(issues),
                Err(e) => {
                    info!("Security lookup for {} failed, assuming none: {}", name, e);
                    Some(Vec::new())
                }
            }
        } else {
            None
        };

        let latest_version = latest.latest_version.clone();
        let checked_at = latest.checked_at;
        let recorded_issues = issues.clone();
        self.storage.modify_version_info(&name, move |info| {
            info.latest_version = latest_version;
            info.checked_at = checked_at;
            if let Some(issues) = recorded_issues {
                info.set_security_issues(issues);
            }
        })?;

        if newer {
            let is_breaking = is_breaking_change(&stored.current_version, &latest.latest_version)?;
            debug!(
                "Update available for {}: {} -> {}",
                name, stored.current_version, latest.latest_version
            );
            report.updates.push(DetectedUpdate {
                name,
                kind: stored.kind,
                language: stored.language,
                registry: kind,
                current_version: stored.current_version,
                latest_version: latest.latest_version,
                security_issues: issues.unwrap_or_default(),
                is_breaking,
            });
        }

        Ok(())
    }

    /// Move a record to `new_version`, keeping the old current as previous
    pub fn update_version_info(
        &self,
        name: &str,
        new_version: &str,
        is_breaking: bool,
    ) -> Result<UpdateResult, ManagerError> {
        SemVer::parse(new_version)?;

        let mut previous_version = String::new();
        let updated = self.storage.modify_version_info(name, |info| {
            previous_version = std::mem::replace(&mut info.current_version, new_version.to_string());
            info.previous_version = previous_version.clone();
            info.latest_version = new_version.to_string();
            info.updated_at = Utc::now();
            // Issues were recorded against the version being replaced
            info.set_security_issues(Vec::new());
            info.metadata
                .insert("last_update_breaking".to_string(), is_breaking.to_string());
        })?;

        info!("Updated {}: {} -> {}", name, previous_version, new_version);

        Ok(UpdateResult {
            name: name.to_string(),
            previous_version,
            new_version: updated.current_version,
            is_breaking,
            updated_at: updated.updated_at,
        })
    }

    pub fn compare_versions(&self, a: &str, b: &str) -> Result<Ordering, ManagerError> {
        Ok(semver::compare_versions(a, b)?)
    }

    pub fn get_version_info(&self, name: &str) -> Result<Option<VersionInfo>, ManagerError> {
        Ok(self.storage.get_version_info(name)?)
    }

    /// Vulnerabilities for `name@version` as reported by the `kind` registry
    pub async fn check_security(
        &self,
        kind: RegistryKind,
        name: &str,
        version: &str,
    ) -> Result<Vec<SecurityIssue>, ManagerError> {
        let registry = self
            .registries
            .get(&kind)
            .ok_or_else(|| RegistryError::NotConfigured(kind.to_string()))?;
        Ok(registry.check_security(name, version).await?)
    }
}
