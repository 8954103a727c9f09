//! Domain types shared by every outpost crate.
//!
//! [`Version`] is totally ordered and serializes as its dotted string form so
//! it can travel through YAML config, JSON event payloads and URLs alike.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a feedback channel (e.g. `auditlog`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelName(pub String);

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ChannelName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The two independent things the agent keeps up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// The agent's own binary (self-update).
    Agent,
    /// The deployment package managed on behalf of the server.
    Deployment,
}

impl TargetKind {
    /// Server path segment for this target.
    pub fn subsystem(&self) -> &'static str {
        match self {
            TargetKind::Agent => "agent",
            TargetKind::Deployment => "deployment",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subsystem())
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// `major.minor.micro[.qualifier]`.
///
/// Ordering compares the numeric components first, then the qualifier
/// lexically; an empty qualifier sorts lowest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub qualifier: String,
}

impl Version {
    /// The minimum version, used when nothing is installed yet.
    pub const EMPTY: Version = Version {
        major: 0,
        minor: 0,
        micro: 0,
        qualifier: String::new(),
    };

    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.micro)
            .cmp(&(other.major, other.minor, other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(ParseError::version(s, "empty version"));
        }

        let mut parts = input.splitn(4, '.');
        let mut numbers = [0u32; 3];
        for (idx, slot) in numbers.iter_mut().enumerate() {
            match parts.next() {
                Some(part) => {
                    *slot = part.parse().map_err(|_| {
                        ParseError::version(s, format!("component {} is not a number", idx + 1))
                    })?;
                }
                None if idx == 0 => return Err(ParseError::version(s, "missing major")),
                None => break,
            }
        }

        let qualifier = parts.next().unwrap_or_default();
        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ParseError::version(s, "invalid qualifier"));
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier: qualifier.to_owned(),
        })
    }
}

impl TryFrom<String> for Version {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UpdateInfo
// ---------------------------------------------------------------------------

/// Immutable description of a single install attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub target: TargetKind,
    pub from: Version,
    pub to: Version,
    pub fix_package: bool,
}

impl UpdateInfo {
    pub fn new(target: TargetKind, from: Version, to: Version, fix_package: bool) -> Self {
        Self {
            target,
            from,
            to,
            fix_package,
        }
    }
}

impl fmt::Display for UpdateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.target, self.from, self.to)?;
        if self.fix_package {
            f.write_str(" (fix package)")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.0.0", "1.0.1")]
    #[case("1.9.9", "2.0.0")]
    #[case("1.2.3", "1.2.3.beta")]
    #[case("1.2.3.alpha", "1.2.3.beta")]
    #[case("0.0.0", "0.0.1")]
    #[case("1.10", "1.10.1")]
    fn version_ordering(#[case] lower: &str, #[case] higher: &str) {
        let lower: Version = lower.parse().expect("lower");
        let higher: Version = higher.parse().expect("higher");
        assert!(lower < higher, "{lower} should sort before {higher}");
    }

    #[test]
    fn empty_version_is_minimum() {
        let v: Version = "0.0.0".parse().unwrap();
        assert_eq!(v, Version::EMPTY);
        assert!(Version::EMPTY < Version::new(0, 0, 1));
        assert!(Version::default().is_empty());
    }

    #[test]
    fn short_forms_fill_zeroes() {
        assert_eq!("2".parse::<Version>().unwrap(), Version::new(2, 0, 0));
        assert_eq!("2.1".parse::<Version>().unwrap(), Version::new(2, 1, 0));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("a.b.c")]
    #[case("1.-2.0")]
    #[case("1.0.0.bad qualifier")]
    fn invalid_versions_are_rejected(#[case] input: &str) {
        assert!(input.parse::<Version>().is_err(), "'{input}' must not parse");
    }

    #[test]
    fn display_matches_input() {
        for s in ["1.0.0", "3.2.1.rc-1"] {
            assert_eq!(s.parse::<Version>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn version_serializes_as_string() {
        let info = UpdateInfo::new(
            TargetKind::Deployment,
            Version::EMPTY,
            Version::new(2, 0, 0),
            false,
        );
        let yaml = serde_yaml::to_string(&info).expect("serialize");
        assert!(yaml.contains("to: 2.0.0"), "got: {yaml}");
        let back: UpdateInfo = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, info);
    }

    #[test]
    fn target_kind_display() {
        assert_eq!(TargetKind::Agent.to_string(), "agent");
        assert_eq!(TargetKind::Deployment.subsystem(), "deployment");
        assert_eq!(ChannelName::from("auditlog").to_string(), "auditlog");
    }
}
