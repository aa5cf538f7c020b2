//! Version parsing and upgrade compatibility matrix (spec.md §4.A).
//!
//! A tag is either *semantic* (`5.x`, treated as a graph-DB release line) or
//! *calendar* (`year >= 2025`). The parser is pure; `can_upgrade` is the sole
//! gate consulted by the rolling-upgrade orchestrator (`upgrade`) and the
//! backup orchestrator's minimum-support predicate.

use std::cmp::Ordering;
use std::fmt;

const MIN_SEMVER_MINOR_FOR_UPGRADE: u64 = 26;
const MIN_SEMVER_MAJOR_FOR_UPGRADE: u64 = 5;
const MIN_CALENDAR_YEAR: u64 = 2025;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `MAJOR.MINOR[.PATCH]`, major < 2025.
    Semantic,
    /// `YEAR.MONTH[.PATCH]`, major (year) >= 2025.
    Calendar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub scheme: Scheme,
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Parse a tag of the form `[v][namespace/]MAJOR.MINOR[.PATCH][-suffix]`.
    pub fn parse(tag: &str) -> Result<Self, VersionError> {
        let mut s = tag.trim();
        if let Some(idx) = s.rfind('/') {
            s = &s[idx + 1..];
        }
        s = s.strip_prefix('v').unwrap_or(s);
        // Drop any `-suffix` (pre-release/build metadata); compatibility
        // reasoning operates on the numeric triple only.
        let numeric = s.split('-').next().unwrap_or(s);

        let mut parts = numeric.split('.');
        let major = parts
            .next()
            .ok_or_else(|| VersionError::Malformed(tag.to_string()))?
            .parse::<u64>()
            .map_err(|_| VersionError::Malformed(tag.to_string()))?;
        let minor = parts
            .next()
            .ok_or_else(|| VersionError::Malformed(tag.to_string()))?
            .parse::<u64>()
            .map_err(|_| VersionError::Malformed(tag.to_string()))?;
        let patch = match parts.next() {
            Some(p) => p
                .parse::<u64>()
                .map_err(|_| VersionError::Malformed(tag.to_string()))?,
            None => 0,
        };

        let scheme = if major >= MIN_CALENDAR_YEAR {
            Scheme::Calendar
        } else {
            Scheme::Semantic
        };

        Ok(Version {
            scheme,
            major,
            minor,
            patch,
        })
    }

    /// Equality under the §4.G normalization rule: `5.26` == `5.26.0`.
    pub fn normalized_eq(&self, other: &Version) -> bool {
        self.scheme == other.scheme && self.major == other.major && self.minor == other.minor
            && self.patch == other.patch
    }

    fn is_4x(&self) -> bool {
        self.scheme == Scheme::Semantic && self.major == 4
    }

    fn meets_min_supported(&self) -> bool {
        match self.scheme {
            Scheme::Calendar => true,
            Scheme::Semantic => {
                self.major > MIN_SEMVER_MAJOR_FOR_UPGRADE
                    || (self.major == MIN_SEMVER_MAJOR_FOR_UPGRADE
                        && self.minor >= MIN_SEMVER_MINOR_FOR_UPGRADE)
            }
        }
    }

    fn cmp_numeric(&self, other: &Version) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("malformed version tag: {0}")]
    Malformed(String),
}

/// Whether the minimum-supported predicate (>=5.26, or any calendar
/// version) is met. Gates backup/restore reconciliation per spec.md §4.A.
pub fn is_min_supported(tag: &str) -> bool {
    match Version::parse(tag) {
        Ok(v) => v.meets_min_supported(),
        Err(_) => false,
    }
}

/// Decide whether an upgrade from `from` to `to` is allowed under the
/// table in spec.md §4.A.
pub fn can_upgrade(from: &Version, to: &Version) -> bool {
    if from.is_4x() || to.is_4x() {
        return false;
    }

    match (from.scheme, to.scheme) {
        (Scheme::Semantic, Scheme::Semantic) => {
            from.meets_min_supported()
                && to.meets_min_supported()
                && to.cmp_numeric(from) != Ordering::Less
        }
        (Scheme::Semantic, Scheme::Calendar) => from.meets_min_supported(),
        (Scheme::Calendar, Scheme::Calendar) => to.cmp_numeric(from) != Ordering::Less,
        (Scheme::Calendar, Scheme::Semantic) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parses_plain_semver() {
        let ver = v("5.26.0");
        assert_eq!(ver.scheme, Scheme::Semantic);
        assert_eq!((ver.major, ver.minor, ver.patch), (5, 26, 0));
    }

    #[test]
    fn parses_v_prefix_and_missing_patch() {
        let ver = v("v5.26");
        assert_eq!((ver.major, ver.minor, ver.patch), (5, 26, 0));
    }

    #[test]
    fn parses_calendar_with_suffix_and_namespace() {
        let ver = v("docker.io/graphdb/core:2025.01.3-rc1");
        assert_eq!(ver.scheme, Scheme::Calendar);
        assert_eq!((ver.major, ver.minor, ver.patch), (2025, 1, 3));
    }

    #[test]
    fn normalized_eq_ignores_missing_patch() {
        assert!(v("5.26").normalized_eq(&v("5.26.0")));
        assert!(!v("5.26").normalized_eq(&v("5.27.0")));
    }

    // S5 from spec.md §8.
    #[test]
    fn s5_upgrade_compatibility_table() {
        assert!(!can_upgrade(&v("5.25.0"), &v("5.26.0")));
        assert!(can_upgrade(&v("5.26.0"), &v("5.27.0")));
        assert!(can_upgrade(&v("5.26.0"), &v("2025.01.0")));
        assert!(!can_upgrade(&v("2025.01.0"), &v("5.26.0")));
        assert!(!can_upgrade(&v("2026.01.0"), &v("2025.12.0")));
    }

    #[test]
    fn rejects_any_4x_involvement() {
        assert!(!can_upgrade(&v("4.4.0"), &v("5.26.0")));
        assert!(!can_upgrade(&v("5.26.0"), &v("4.4.0")));
    }

    #[test]
    fn rejects_backward_semver_below_min() {
        assert!(!can_upgrade(&v("5.10.0"), &v("5.11.0")));
    }

    #[test]
    fn min_supported_predicate() {
        assert!(is_min_supported("5.26.0"));
        assert!(!is_min_supported("5.25.9"));
        assert!(is_min_supported("2025.01.0"));
        assert!(!is_min_supported("garbage"));
    }
}
