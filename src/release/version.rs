//! Plugin versions and release channels
//!
//! A pre-release label on the version selects the marketplace channel the
//! build is published to: `2.1.7-alpha.3` goes to `alpha`, `2.1.7` goes to
//! the default channel.

use std::fmt;

use serde::Serialize;

use crate::common::{Error, Result};

/// Name of the channel used when the version carries no pre-release label
pub const DEFAULT_CHANNEL: &str = "default";

/// An immutable plugin version string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Version(String);

/// Parsed `major.minor.patch[-pre]` view of a [`Version`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionComponents {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Option<String>,
}

impl Version {
    /// Wrap a version string, rejecting only empty input
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvalidVersionFormat(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Semantic version components, when the string is valid semver
    pub fn components(&self) -> Option<VersionComponents> {
        let parsed = semver::Version::parse(&self.0).ok()?;
        Some(VersionComponents {
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            pre_release: (!parsed.pre.is_empty()).then(|| parsed.pre.to_string()),
        })
    }

    /// Release channel selected by this version
    pub fn channel(&self) -> ReleaseChannel {
        channel_from_str(&self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marketplace release channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReleaseChannel {
    Default,
    Named(String),
}

impl ReleaseChannel {
    pub fn name(&self) -> &str {
        match self {
            Self::Default => DEFAULT_CHANNEL,
            Self::Named(name) => name,
        }
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ReleaseChannel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Derive the release channel for a raw version string
///
/// The label is the text after the first `-`, cut at its first `.`. Names
/// are not checked against a list of known channels.
pub fn derive_channel(version: &str) -> Result<ReleaseChannel> {
    if version.is_empty() {
        return Err(Error::InvalidVersionFormat(version.to_string()));
    }
    Ok(channel_from_str(version))
}

fn channel_from_str(version: &str) -> ReleaseChannel {
    let label = version
        .split_once('-')
        .map(|(_, suffix)| suffix.split('.').next().unwrap_or(""))
        .unwrap_or("");

    if label.is_empty() {
        ReleaseChannel::Default
    } else {
        ReleaseChannel::Named(label.to_string())
    }
}
