//! Artifact version handling for best-version lookups

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Semantic version of a conformance artifact.
///
/// Artifact versions in the wild are often short ("2", "4.0") or carry a
/// ballot label ("5.0.0-snapshot1"), so missing minor/patch parts default to 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre_release: Option<String>,
    pub build: Option<String>,
}

impl SchemaVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
            build: None,
        }
    }

    pub fn new_pre_release(
        major: u32,
        minor: u32,
        patch: u32,
        pre_release: impl Into<String>,
    ) -> Self {
        Self {
            pre_release: Some(pre_release.into()),
            ..Self::new(major, minor, patch)
        }
    }

    pub fn is_pre_release(&self) -> bool {
        self.pre_release.is_some()
    }

    /// Parse a version string, returning `None` for non-numeric versions
    /// such as dates or free text.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;

        if let Some(ref pre) = self.pre_release {
            write!(f, "-{pre}")?;
        }

        if let Some(ref build) = self.build {
            write!(f, "+{build}")?;
        }

        Ok(())
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (version_part, build) = match s.split_once('+') {
            Some((v, b)) => (v, Some(b.to_string())),
            None => (s, None),
        };

        let (core_part, pre_release) = match version_part.split_once('-') {
            Some((c, p)) => (c, Some(p.to_string())),
            None => (version_part, None),
        };

        let parts: Vec<&str> = core_part.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(format!("Version must have 1 to 3 numeric parts, got '{s}'"));
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse::<u32>()
                .map_err(|_| format!("Invalid version component '{part}' in '{s}'"))?;
        }

        Ok(SchemaVersion {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre_release,
            build,
        })
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
            // Build metadata only breaks ties
            .then_with(|| self.build.cmp(&other.build))
    }
}

/// Rank used when choosing among stored versions of one canonical URL.
///
/// Parseable versions outrank unparseable ones, which outrank unversioned
/// artifacts. Ties between unparseable versions fall back to string order so
/// the choice never depends on insertion order.
pub fn version_rank(version: Option<&str>) -> (u8, Option<SchemaVersion>, String) {
    match version {
        Some(v) => match SchemaVersion::parse(v) {
            Some(parsed) => (2, Some(parsed), v.to_string()),
            None => (1, None, v.to_string()),
        },
        None => (0, None, String::new()),
    }
}

/// Split a canonical reference of the form `url|version`.
pub fn split_canonical(canonical: &str) -> (&str, Option<&str>) {
    match canonical.split_once('|') {
        Some((url, version)) if !version.is_empty() => (url, Some(version)),
        Some((url, _)) => (url, None),
        None => (canonical, None),
    }
}
