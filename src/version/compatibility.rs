//! Rule-based compatibility checks between tracked packages
//!
//! A rule says: when `package` is at a version matching `version`, other
//! packages must satisfy the `compatible` constraints and must not match the
//! `incompatible` ones. Rules are validated once when registered.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::version::constraint::Constraint;
use crate::version::error::CompatibilityError;
use crate::version::semver::SemVer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityRule {
    pub package: String,
    /// Exact version or constraint selecting the versions this rule applies to
    pub version: String,
    #[serde(default)]
    pub compatible: BTreeMap<String, String>,
    #[serde(default)]
    pub incompatible: BTreeMap<String, String>,
    #[serde(default)]
    pub notes: String,
}

impl CompatibilityRule {
    pub fn new(package: &str, version: &str) -> Self {
        Self {
            package: package.to_string(),
            version: version.to_string(),
            compatible: BTreeMap::new(),
            incompatible: BTreeMap::new(),
            notes: String::new(),
        }
    }

    pub fn requires(mut self, dependency: &str, constraint: &str) -> Self {
        self.compatible
            .insert(dependency.to_string(), constraint.to_string());
        self
    }

    pub fn conflicts_with(mut self, dependency: &str, constraint: &str) -> Self {
        self.incompatible
            .insert(dependency.to_string(), constraint.to_string());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.to_string();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    InvalidVersion,
    ConstraintUnsatisfied,
    Incompatible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityIssue {
    pub kind: IssueKind,
    pub package: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompatibilityResult {
    pub compatible: bool,
    pub issues: Vec<CompatibilityIssue>,
    pub warnings: Vec<String>,
}

/// A rule with its constraints parsed
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: CompatibilityRule,
    applies_to: Constraint,
    compatible: Vec<(String, Constraint)>,
    incompatible: Vec<(String, Constraint)>,
}

impl CompiledRule {
    fn compile(rule: CompatibilityRule) -> Result<Self, CompatibilityError> {
        let applies_to = Constraint::parse(&rule.version).map_err(|source| {
            CompatibilityError::InvalidRuleVersion {
                package: rule.package.clone(),
                version: rule.version.clone(),
                source,
            }
        })?;

        let parse_all = |map: &BTreeMap<String, String>| {
            map.iter()
                .map(|(dependency, constraint)| {
                    Constraint::parse(constraint)
                        .map(|c| (dependency.clone(), c))
                        .map_err(|source| CompatibilityError::InvalidRuleConstraint {
                            package: rule.package.clone(),
                            dependency: dependency.clone(),
                            source,
                        })
                })
                .collect::<Result<Vec<_>, _>>()
        };

        let compatible = parse_all(&rule.compatible)?;
        let incompatible = parse_all(&rule.incompatible)?;

        Ok(Self {
            rule,
            applies_to,
            compatible,
            incompatible,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompatibilityMatrix {
    rules: BTreeMap<String, Vec<CompiledRule>>,
}

impl CompatibilityMatrix {
    /// Empty matrix
    pub fn new() -> Self {
        Self::default()
    }

    /// Matrix seeded with the built-in rule table
    pub fn with_defaults() -> Self {
        let mut matrix = Self::new();
        for rule in default_rules() {
            match CompiledRule::compile(rule) {
                Ok(compiled) => matrix.insert(compiled),
                Err(e) => debug!("Skipping built-in compatibility rule: {}", e),
            }
        }
        matrix
    }

    /// Registers a rule after validating every version and constraint in it
    pub fn add_rule(&mut self, rule: CompatibilityRule) -> Result<(), CompatibilityError> {
        let compiled = CompiledRule::compile(rule)?;
        self.insert(compiled);
        Ok(())
    }

    fn insert(&mut self, compiled: CompiledRule) {
        self.rules
            .entry(compiled.rule.package.clone())
            .or_default()
            .push(compiled);
    }

    pub fn rules_for(&self, package: &str) -> Vec<&CompatibilityRule> {
        self.rules
            .get(package)
            .map(|rules| rules.iter().map(|r| &r.rule).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks a set of `name -> version` pins against every applicable rule
    pub fn check_compatibility(&self, packages: &BTreeMap<String, String>) -> CompatibilityResult {
        let mut result = CompatibilityResult::default();
        let mut parsed: BTreeMap<&str, SemVer> = BTreeMap::new();

        for (name, version) in packages {
            match SemVer::parse(version) {
                Ok(v) => {
                    parsed.insert(name.as_str(), v);
                }
                Err(e) => result.issues.push(CompatibilityIssue {
                    kind: IssueKind::InvalidVersion,
                    package: name.clone(),
                    version: version.clone(),
                    dependency: None,
                    dependency_version: None,
                    constraint: None,
                    message: e.to_string(),
                }),
            }
        }

        for (name, version) in &parsed {
            let Some(rules) = self.rules.get(*name) else {
                continue;
            };

            for rule in rules.iter().filter(|r| r.applies_to.matches(version)) {
                if !rule.rule.notes.is_empty() {
                    result
                        .warnings
                        .push(format!("{}@{}: {}", name, packages[*name], rule.rule.notes));
                }

                for (dependency, constraint) in &rule.compatible {
                    let Some(dep_version) = parsed.get(dependency.as_str()) else {
                        continue;
                    };
                    if !constraint.matches(dep_version) {
                        result.issues.push(issue(
                            IssueKind::ConstraintUnsatisfied,
                            name,
                            packages,
                            dependency,
                            constraint,
                            format!(
                                "{} {} requires {} {}, found {}",
                                name,
                                packages[*name],
                                dependency,
                                constraint,
                                packages[dependency]
                            ),
                        ));
                    }
                }

                for (dependency, constraint) in &rule.incompatible {
                    let Some(dep_version) = parsed.get(dependency.as_str()) else {
                        continue;
                    };
                    if constraint.matches(dep_version) {
                        result.issues.push(issue(
                            IssueKind::Incompatible,
                            name,
                            packages,
                            dependency,
                            constraint,
                            format!(
                                "{} {} is incompatible with {} {}",
                                name, packages[*name], dependency, packages[dependency]
                            ),
                        ));
                    }
                }
            }
        }

        result.compatible = result.issues.is_empty();
        result
    }

    /// Best-effort single pass replacing conflicting dependency versions
    ///
    /// For each issue the first candidate that resolves it is substituted.
    /// Substitutions are not re-checked against other rules.
    pub fn suggest_compatible_versions(
        &self,
        packages: &BTreeMap<String, String>,
        candidates: &BTreeMap<String, Vec<String>>,
    ) -> BTreeMap<String, String> {
        let mut suggested = packages.clone();
        let result = self.check_compatibility(packages);

        for issue in &result.issues {
            let (Some(dependency), Some(constraint)) = (&issue.dependency, &issue.constraint)
            else {
                continue;
            };
            let Ok(constraint) = Constraint::parse(constraint) else {
                continue;
            };
            let Some(options) = candidates.get(dependency) else {
                continue;
            };

            let wanted = issue.kind == IssueKind::ConstraintUnsatisfied;
            let pick = options.iter().find(|candidate| {
                SemVer::parse(candidate)
                    .map(|v| constraint.matches(&v) == wanted)
                    .unwrap_or(false)
            });

            if let Some(pick) = pick {
                debug!(
                    "Suggesting {} {} instead of {}",
                    dependency, pick, packages[dependency]
                );
                suggested.insert(dependency.clone(), pick.clone());
            }
        }

        suggested
    }
}

fn issue(
    kind: IssueKind,
    name: &str,
    packages: &BTreeMap<String, String>,
    dependency: &str,
    constraint: &Constraint,
    message: String,
) -> CompatibilityIssue {
    CompatibilityIssue {
        kind,
        package: name.to_string(),
        version: packages[name].clone(),
        dependency: Some(dependency.to_string()),
        dependency_version: Some(packages[dependency].clone()),
        constraint: Some(constraint.to_string()),
        message,
    }
}

fn default_rules() -> Vec<CompatibilityRule> {
    vec![
        CompatibilityRule::new("react", "^18.0.0")
            .requires("react-dom", "^18.0.0")
            .requires("typescript", ">=4.1.0")
            .with_notes("React 18 must be paired with react-dom 18"),
        CompatibilityRule::new("next", "^14.0.0")
            .requires("react", "^18.2.0")
            .requires("typescript", ">=4.5.2"),
        CompatibilityRule::new("next", "^15.0.0")
            .requires("react", "^19.0.0")
            .requires("typescript", ">=5.0.0")
            .with_notes("Next.js 15 moves to the React 19 release line"),
        CompatibilityRule::new("vue", "^3.0.0")
            .requires("typescript", ">=4.5.0")
            .conflicts_with("vue-template-compiler", "^2.0.0")
            .with_notes("Vue 3 uses @vue/compiler-sfc instead of vue-template-compiler"),
        CompatibilityRule::new("vite", "^5.0.0").requires("nodejs/node", ">=18.0.0"),
        CompatibilityRule::new("vite", "^6.0.0").requires("nodejs/node", ">=18.0.0"),
        CompatibilityRule::new("express", "^5.0.0").requires("nodejs/node", ">=18.0.0"),
    ]
}
