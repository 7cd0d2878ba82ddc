//! Version constraints
//!
//! Supported forms:
//! - `1.2.3`, `=1.2.3` - exact match
//! - `^1.2.3` - same major, at least 1.2.3
//! - `~1.2.3` - same major and minor, at least 1.2.3
//! - `>=1.2.3`, `>1.2.3`, `<=1.2.3`, `<1.2.3` - comparison operators
//!
//! Unlike npm, `^0.x` is not special-cased: the caret always pins the major only.

use std::fmt;

use crate::version::error::VersionError;
use crate::version::semver::SemVer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Exact(SemVer),
    Caret(SemVer),
    Tilde(SemVer),
    Gte(SemVer),
    Gt(SemVer),
    Lte(SemVer),
    Lt(SemVer),
}

impl Constraint {
    pub fn parse(spec: &str) -> Result<Self, VersionError> {
        let spec = spec.trim();
        let invalid = || VersionError::InvalidConstraint(spec.to_string());
        let version = |rest: &str| SemVer::parse(rest.trim()).map_err(|_| invalid());

        if spec.is_empty() {
            return Err(invalid());
        }

        if let Some(rest) = spec.strip_prefix(">=") {
            version(rest).map(Constraint::Gte)
        } else if let Some(rest) = spec.strip_prefix("<=") {
            version(rest).map(Constraint::Lte)
        } else if let Some(rest) = spec.strip_prefix('>') {
            version(rest).map(Constraint::Gt)
        } else if let Some(rest) = spec.strip_prefix('<') {
            version(rest).map(Constraint::Lt)
        } else if let Some(rest) = spec.strip_prefix('^') {
            version(rest).map(Constraint::Caret)
        } else if let Some(rest) = spec.strip_prefix('~') {
            version(rest).map(Constraint::Tilde)
        } else if let Some(rest) = spec.strip_prefix('=') {
            version(rest).map(Constraint::Exact)
        } else {
            version(spec).map(Constraint::Exact)
        }
    }

    pub fn matches(&self, v: &SemVer) -> bool {
        match self {
            Constraint::Exact(base) => v == base,
            Constraint::Caret(base) => v.major == base.major && v >= base,
            Constraint::Tilde(base) => {
                v.major == base.major && v.minor == base.minor && v >= base
            }
            Constraint::Gte(base) => v >= base,
            Constraint::Gt(base) => v > base,
            Constraint::Lte(base) => v <= base,
            Constraint::Lt(base) => v < base,
        }
    }

    /// Convenience for matching a raw version string
    pub fn matches_str(&self, version: &str) -> Result<bool, VersionError> {
        Ok(self.matches(&SemVer::parse(version)?))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Exact(v) => write!(f, "{}", v),
            Constraint::Caret(v) => write!(f, "^{}", v),
            Constraint::Tilde(v) => write!(f, "~{}", v),
            Constraint::Gte(v) => write!(f, ">={}", v),
            Constraint::Gt(v) => write!(f, ">{}", v),
            Constraint::Lte(v) => write!(f, "<={}", v),
            Constraint::Lt(v) => write!(f, "<{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(">=1.0.0", "1.0.0", true)]
    #[case(">= 1.0.0", "0.9.0", false)]
    #[case("<2.0.0", "2.0.0-rc.1", true)]
    #[case("^0.2.0", "0.9.0", true)]
    #[case("^0.2.0", "1.0.0", false)]
    #[case("~0.2.1", "0.2.0", false)]
    #[case("v1.2.3", "1.2.3", true)]
    #[case("=v1.2.3", "1.2.3+meta", true)]
    fn matches_returns_expected(#[case] spec: &str, #[case] version: &str, #[case] expected: bool) {
        let constraint = Constraint::parse(spec).unwrap();
        assert_eq!(constraint.matches_str(version), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("^")]
    #[case(">=1.2")]
    #[case("1.x")]
    #[case("*")]
    #[case("^1.0.0 || ^2.0.0")]
    fn parse_rejects_unsupported_specs(#[case] spec: &str) {
        assert_eq!(
            Constraint::parse(spec),
            Err(VersionError::InvalidConstraint(spec.trim().to_string()))
        );
    }

    #[test]
    fn display_renders_canonical_form() {
        let constraint = Constraint::parse("^v1.2.3").unwrap();
        assert_eq!(constraint.to_string(), "^1.2.3");
    }
}
