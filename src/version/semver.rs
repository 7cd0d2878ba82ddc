//! Semantic version parsing and precedence
//!
//! Accepts `v?MAJOR.MINOR.PATCH(-PRERELEASE)?(+BUILD)?` and nothing else.
//! Lexing is delegated to the `semver` crate after the optional `v` is stripped,
//! precedence is implemented here so that build metadata never affects ordering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::version::constraint::Constraint;
use crate::version::error::VersionError;

/// A single dot-separated prerelease identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    AlphaNumeric(String),
}

impl Identifier {
    fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse() {
                return Identifier::Numeric(n);
            }
        }
        Identifier::AlphaNumeric(raw.to_string())
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            (Identifier::Numeric(_), Identifier::AlphaNumeric(_)) => Ordering::Less,
            (Identifier::AlphaNumeric(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::AlphaNumeric(a), Identifier::AlphaNumeric(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{}", n),
            Identifier::AlphaNumeric(s) => f.write_str(s),
        }
    }
}

/// Parsed semantic version
///
/// Equality and ordering follow semver precedence: `build` and `original`
/// are carried along but never compared.
#[derive(Debug, Clone)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Vec<Identifier>,
    pub build: String,
    pub original: String,
}

impl SemVer {
    /// Parse a version string, rejecting partial (`1.2`) or extended (`1.2.3.4`) forms.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let body = input.strip_prefix('v').unwrap_or(input);

        let parsed = semver::Version::parse(body)
            .map_err(|_| VersionError::InvalidVersion(input.to_string()))?;

        let prerelease = if parsed.pre.is_empty() {
            Vec::new()
        } else {
            parsed.pre.as_str().split('.').map(Identifier::parse).collect()
        };

        Ok(Self {
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            prerelease,
            build: parsed.build.as_str().to_string(),
            original: input.to_string(),
        })
    }

    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        let original = format!("{}.{}.{}", major, minor, patch);
        Self {
            major,
            minor,
            patch,
            prerelease: Vec::new(),
            build: String::new(),
            original,
        }
    }

    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    /// Compares two versions, returning -1, 0 or 1
    pub fn compare(&self, other: &SemVer) -> i32 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    /// Checks this version against a constraint such as `^1.2.0` or `>=2.0.0`
    pub fn is_compatible(&self, constraint: &str) -> Result<bool, VersionError> {
        let constraint = Constraint::parse(constraint)?;
        Ok(constraint.matches(self))
    }

    fn cmp_prerelease(&self, other: &SemVer) -> Ordering {
        match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
            (true, true) => Ordering::Equal,
            // A release outranks any prerelease of the same core version
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                for (a, b) in self.prerelease.iter().zip(other.prerelease.iter()) {
                    match a.cmp(b) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                self.prerelease.len().cmp(&other.prerelease.len())
            }
        }
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| self.cmp_prerelease(other))
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SemVer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemVer {}

impl FromStr for SemVer {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SemVer::parse(s)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            let pre: Vec<String> = self.prerelease.iter().map(|i| i.to_string()).collect();
            write!(f, "-{}", pre.join("."))?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}

/// Compare two version strings by semver precedence.
pub fn compare_versions(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(SemVer::parse(a)?.cmp(&SemVer::parse(b)?))
}

/// An update is breaking when the latest major exceeds the current major.
pub fn is_breaking_change(current: &str, latest: &str) -> Result<bool, VersionError> {
    Ok(SemVer::parse(latest)?.major > SemVer::parse(current)?.major)
}

/// Sort version strings in ascending precedence.
///
/// Fails on the first unparsable entry instead of skipping it.
pub fn sort_versions(versions: &[String]) -> Result<Vec<String>, VersionError> {
    let mut parsed = versions
        .iter()
        .map(|v| SemVer::parse(v).map(|p| (v.clone(), p)))
        .collect::<Result<Vec<_>, _>>()?;

    parsed.sort_by(|(_, a), (_, b)| a.cmp(b));

    Ok(parsed.into_iter().map(|(v, _)| v).collect())
}

/// Highest version by precedence, returned in its original spelling.
pub fn latest_version(versions: &[String]) -> Result<String, VersionError> {
    sort_versions(versions)?.pop().ok_or(VersionError::Empty)
}
