//! Resolved plugin metadata handed to the build and publish steps

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::config::Config;
use crate::common::{Error, Result};

use super::changelog::{resolve_change_notes, Changelog, OutputType};
use super::description::extract_description;
use super::version::{ReleaseChannel, Version};

/// Everything the pipeline derives from configuration, README and changelog
#[derive(Debug, Clone, Serialize)]
pub struct PluginMetadata {
    pub name: String,
    pub version: Version,
    pub channel: ReleaseChannel,
    pub since_build: Option<String>,
    pub description: Option<String>,
    pub change_notes: String,
}

impl PluginMetadata {
    /// Resolve metadata, reading the changelog and README named in `config`
    ///
    /// `version_override` takes precedence over `[plugin] version`. A missing
    /// README is tolerated; a README without description markers is not.
    pub fn resolve(config: &Config, version_override: Option<&str>) -> Result<Self> {
        let version = resolve_version(config, version_override)?;
        let channel = version.channel();

        let changelog_text = Error::read_file(&config.plugin.changelog)?;
        let changelog = Changelog::parse(&changelog_text, &config.plugin.unreleased_label);
        let change_notes = resolve_change_notes(&version, changelog.entries(), OutputType::Html)?;

        let description = if config.plugin.readme.exists() {
            Some(extract_description(&Error::read_file(&config.plugin.readme)?)?)
        } else {
            tracing::warn!(
                "README {} not found, publishing without a description",
                config.plugin.readme.display()
            );
            None
        };

        tracing::info!(%version, %channel, "Resolved plugin metadata");

        Ok(Self {
            name: config.plugin.name.clone(),
            version,
            channel,
            since_build: config.plugin.since_build.clone(),
            description,
            change_notes,
        })
    }

    /// Write the metadata as pretty JSON into `dir`, returning the file path
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("metadata.json");
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

/// Pick the version from the override or the configuration
pub fn resolve_version(config: &Config, version_override: Option<&str>) -> Result<Version> {
    Version::parse(version_override.unwrap_or(&config.plugin.version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(changelog: &str, readme: Option<&str>) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CHANGELOG.md"), changelog).unwrap();
        if let Some(readme) = readme {
            std::fs::write(dir.path().join("README.md"), readme).unwrap();
        }
        let mut config = Config::default();
        config.plugin.name = "Scala Helper".to_string();
        config.plugin.version = "2.1.7-alpha.3".to_string();
        config.plugin.changelog = dir.path().join("CHANGELOG.md");
        config.plugin.readme = dir.path().join("README.md");
        (dir, config)
    }

    #[test]
    fn test_resolve_metadata() {
        let (_dir, config) = project(
            "## [Unreleased]\n### Added\n- Thing\n",
            Some("<!-- Plugin description -->\nHelps.\n<!-- Plugin description end -->\n"),
        );
        let meta = PluginMetadata::resolve(&config, None).unwrap();
        assert_eq!(meta.channel.name(), "alpha");
        assert_eq!(meta.description.as_deref(), Some("<p>Helps.</p>\n"));
        assert!(meta.change_notes.contains("<li>Thing</li>"));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["version"], "2.1.7-alpha.3");
        assert_eq!(json["channel"], "alpha");
    }

    #[test]
    fn test_version_override_and_missing_readme() {
        let (_dir, config) = project("## [3.0.0]\n- Big\n", None);
        let meta = PluginMetadata::resolve(&config, Some("3.0.0")).unwrap();
        assert_eq!(meta.channel.name(), "default");
        assert!(meta.description.is_none());
    }

    #[test]
    fn test_resolver_errors_propagate() {
        let (_dir, mut config) = project("## [1.0.0]\n- Old\n", None);
        config.plugin.version = String::new();
        assert!(matches!(
            PluginMetadata::resolve(&config, None),
            Err(Error::InvalidVersionFormat(_))
        ));
        assert!(matches!(
            PluginMetadata::resolve(&config, Some("1.1.0")),
            Err(Error::ChangelogEntryNotFound(_))
        ));
    }

    #[test]
    fn test_write_to() {
        let (dir, config) = project("## [Unreleased]\n- x\n", None);
        let meta = PluginMetadata::resolve(&config, None).unwrap();
        let path = meta.write_to(&dir.path().join("out")).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["name"], "Scala Helper");
    }
}
