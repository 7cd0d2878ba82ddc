//! Records persisted by the version store

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Schema version written into every store file
pub const STORE_SCHEMA_VERSION: &str = "1.0";

/// Category of a tracked dependency; decides which store map holds it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersionKind {
    Language,
    Framework,
    #[default]
    Package,
}

impl VersionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionKind::Language => "language",
            VersionKind::Framework => "framework",
            VersionKind::Package => "package",
        }
    }
}

impl std::str::FromStr for VersionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "language" => Ok(VersionKind::Language),
            "framework" => Ok(VersionKind::Framework),
            "package" => Ok(VersionKind::Package),
            _ => Err(()),
        }
    }
}

/// A known vulnerability affecting a specific version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIssue {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "SecurityIssue::unknown_severity")]
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_in: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

impl SecurityIssue {
    fn unknown_severity() -> String {
        "unknown".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub kind: VersionKind,
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub latest_version: String,
    #[serde(default)]
    pub previous_version: String,
    #[serde(default = "default_true")]
    pub is_secure: bool,
    #[serde(default)]
    pub security_issues: Vec<SecurityIssue>,
    #[serde(default)]
    pub update_source: String,
    #[serde(default)]
    pub registry_url: String,
    pub checked_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl VersionInfo {
    /// Fresh record with current and latest set to `version`
    pub fn new(name: &str, kind: VersionKind, language: &str, version: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            language: language.to_string(),
            kind,
            current_version: version.to_string(),
            latest_version: version.to_string(),
            previous_version: String::new(),
            is_secure: true,
            security_issues: Vec::new(),
            update_source: String::new(),
            registry_url: String::new(),
            checked_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
        }
    }

    /// Replace the security issues, keeping `is_secure` in sync
    pub fn set_security_issues(&mut self, issues: Vec<SecurityIssue>) {
        self.is_secure = issues.is_empty();
        self.security_issues = issues;
    }

    pub fn is_outdated(&self) -> bool {
        !self.latest_version.is_empty() && self.current_version != self.latest_version
    }

    pub(crate) fn normalize(&mut self) {
        self.is_secure = self.security_issues.is_empty();
    }
}

/// Rules deciding which detected updates may be applied without a human
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatePolicy {
    pub auto_update: bool,
    pub security_priority: bool,
    pub breaking_change_approval: bool,
    pub update_schedule: String,
    /// Records not checked within this many days are considered stale
    pub max_age_days: u32,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            auto_update: false,
            security_priority: true,
            breaking_change_approval: true,
            update_schedule: "weekly".to_string(),
            max_age_days: 30,
        }
    }
}

/// Top-level persisted aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStore {
    pub last_updated: DateTime<Utc>,
    pub version: String,
    #[serde(default)]
    pub languages: IndexMap<String, VersionInfo>,
    #[serde(default)]
    pub frameworks: IndexMap<String, VersionInfo>,
    #[serde(default)]
    pub packages: IndexMap<String, VersionInfo>,
    #[serde(default)]
    pub update_policy: UpdatePolicy,
}

impl Default for VersionStore {
    fn default() -> Self {
        Self {
            last_updated: Utc::now(),
            version: STORE_SCHEMA_VERSION.to_string(),
            languages: IndexMap::new(),
            frameworks: IndexMap::new(),
            packages: IndexMap::new(),
            update_policy: UpdatePolicy::default(),
        }
    }
}

impl VersionStore {
    pub fn map(&self, kind: VersionKind) -> &IndexMap<String, VersionInfo> {
        match kind {
            VersionKind::Language => &self.languages,
            VersionKind::Framework => &self.frameworks,
            VersionKind::Package => &self.packages,
        }
    }

    pub fn map_mut(&mut self, kind: VersionKind) -> &mut IndexMap<String, VersionInfo> {
        match kind {
            VersionKind::Language => &mut self.languages,
            VersionKind::Framework => &mut self.frameworks,
            VersionKind::Package => &mut self.packages,
        }
    }

    pub fn get(&self, name: &str) -> Option<&VersionInfo> {
        self.languages
            .get(name)
            .or_else(|| self.frameworks.get(name))
            .or_else(|| self.packages.get(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VersionInfo> {
        if self.languages.contains_key(name) {
            self.languages.get_mut(name)
        } else if self.frameworks.contains_key(name) {
            self.frameworks.get_mut(name)
        } else {
            self.packages.get_mut(name)
        }
    }

    /// Insert into the map matching `info.kind`, evicting the name from the others
    pub fn insert(&mut self, mut info: VersionInfo) {
        info.normalize();
        for kind in [
            VersionKind::Language,
            VersionKind::Framework,
            VersionKind::Package,
        ] {
            if kind != info.kind {
                self.map_mut(kind).shift_remove(&info.name);
            }
        }
        let kind = info.kind;
        self.map_mut(kind).insert(info.name.clone(), info);
    }

    pub fn remove(&mut self, name: &str) -> Option<VersionInfo> {
        self.languages
            .shift_remove(name)
            .or_else(|| self.frameworks.shift_remove(name))
            .or_else(|| self.packages.shift_remove(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionInfo> {
        self.languages
            .values()
            .chain(self.frameworks.values())
            .chain(self.packages.values())
    }

    pub fn len(&self) -> usize {
        self.languages.len() + self.frameworks.len() + self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
