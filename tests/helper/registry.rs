//! Registry and storage test utilities

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use template_versions::version::cache::MemoryCache;
use template_versions::version::error::RegistryError;
use template_versions::version::manager::VersionManager;
use template_versions::version::registry::{Registry, RegistryKind};
use template_versions::version::storage::VersionStorage;
use template_versions::version::types::{SecurityIssue, UpdatePolicy, VersionInfo, VersionKind};

/// Registry answering from a fixed table
pub struct StaticRegistry {
    kind: RegistryKind,
    latest: BTreeMap<String, String>,
    issues: HashMap<String, Vec<SecurityIssue>>,
    failing: HashSet<String>,
    available: bool,
}

impl StaticRegistry {
    pub fn new(kind: RegistryKind) -> Self {
        Self {
            kind,
            latest: BTreeMap::new(),
            issues: HashMap::new(),
            failing: HashSet::new(),
            available: true,
        }
    }

    pub fn with_latest(mut self, package: &str, version: &str) -> Self {
        self.latest.insert(package.to_string(), version.to_string());
        self
    }

    /// Report a vulnerability for every version of `package`
    pub fn with_issue(mut self, package: &str, id: &str) -> Self {
        self.issues
            .entry(package.to_string())
            .or_default()
            .push(security_issue(id));
        self
    }

    /// Track `package` but fail every lookup for it
    pub fn with_failing(mut self, package: &str) -> Self {
        self.failing.insert(package.to_string());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    fn kind(&self) -> RegistryKind {
        self.kind
    }

    fn supported_packages(&self) -> Vec<String> {
        self.latest
            .keys()
            .chain(self.failing.iter())
            .cloned()
            .collect()
    }

    fn version_info(&self, package_name: &str, version: &str) -> VersionInfo {
        let mut info = VersionInfo::new(package_name, VersionKind::Package, "javascript", version);
        info.update_source = self.kind.as_str().to_string();
        info
    }

    async fn get_latest_version(&self, package_name: &str) -> Result<VersionInfo, RegistryError> {
        if self.failing.contains(package_name) {
            return Err(RegistryError::InvalidResponse("connection reset".to_string()));
        }
        self.latest
            .get(package_name)
            .map(|version| self.version_info(package_name, version))
            .ok_or_else(|| RegistryError::NotFound(package_name.to_string()))
    }

    async fn check_security(
        &self,
        package_name: &str,
        _version: &str,
    ) -> Result<Vec<SecurityIssue>, RegistryError> {
        Ok(self.issues.get(package_name).cloned().unwrap_or_default())
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}

pub fn security_issue(id: &str) -> SecurityIssue {
    SecurityIssue {
        id: id.to_string(),
        summary: format!("{} summary", id),
        severity: "HIGH".to_string(),
        fixed_in: None,
        aliases: vec![],
        references: vec![],
        published: None,
    }
}

/// Store in a temp dir holding `records` (name, current version) and `policy`
pub fn create_test_storage(
    records: &[(&str, &str)],
    policy: UpdatePolicy,
) -> (TempDir, Arc<VersionStorage>) {
    let temp_dir = TempDir::new().unwrap();
    let storage = VersionStorage::open(&temp_dir.path().join("versions.yaml")).unwrap();

    for (name, version) in records {
        storage
            .set_version_info(VersionInfo::new(name, VersionKind::Package, "javascript", version))
            .unwrap();
    }
    storage.set_update_policy(policy).unwrap();

    (temp_dir, Arc::new(storage))
}

/// Manager over `storage`, a fresh memory cache and the given registries
pub fn create_test_manager(
    storage: Arc<VersionStorage>,
    registries: Vec<StaticRegistry>,
) -> Arc<VersionManager> {
    let registries: HashMap<RegistryKind, Arc<dyn Registry>> = registries
        .into_iter()
        .map(|r| (r.kind(), Arc::new(r) as Arc<dyn Registry>))
        .collect();

    Arc::new(VersionManager::new(
        storage,
        Arc::new(MemoryCache::default()),
        registries,
    ))
}
