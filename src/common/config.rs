//! Configuration file handling

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::paths::{config_path, PROJECT_CONFIG_FILE};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Plugin metadata and source documents
    #[serde(default)]
    pub plugin: PluginConfig,

    /// Build step
    #[serde(default)]
    pub build: BuildConfig,

    /// Signing step
    #[serde(default)]
    pub signing: SigningConfig,

    /// Publish step
    #[serde(default)]
    pub publish: PublishConfig,

    /// Host IDE used for UI verification
    #[serde(default)]
    pub host: HostConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// String fixtures registered as scenario capabilities
    #[serde(default)]
    pub fixtures: BTreeMap<String, String>,
}

/// Plugin metadata settings
#[derive(Debug, Deserialize)]
pub struct PluginConfig {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Semantic version, optionally with a pre-release label (`2.1.7-alpha.3`)
    #[serde(default)]
    pub version: String,

    /// Earliest supported IDE build
    #[serde(default)]
    pub since_build: Option<String>,

    /// README holding the plugin description markers
    #[serde(default = "default_readme")]
    pub readme: PathBuf,

    /// Keep a Changelog style document
    #[serde(default = "default_changelog")]
    pub changelog: PathBuf,

    /// Heading used for the not-yet-released entry
    #[serde(default = "default_unreleased_label")]
    pub unreleased_label: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            since_build: None,
            readme: default_readme(),
            changelog: default_changelog(),
            unreleased_label: default_unreleased_label(),
        }
    }
}

fn default_readme() -> PathBuf {
    PathBuf::from("README.md")
}
fn default_changelog() -> PathBuf {
    PathBuf::from("CHANGELOG.md")
}
fn default_unreleased_label() -> String {
    "Unreleased".to_string()
}

/// Build step settings
#[derive(Debug, Deserialize, Default)]
pub struct BuildConfig {
    /// Shell command producing the plugin archive
    pub command: Option<String>,

    /// Path of the produced archive; `{version}` is substituted
    pub artifact: Option<String>,
}

/// Signing step settings
#[derive(Debug, Deserialize, Default)]
pub struct SigningConfig {
    /// Signer command template (`{input}`, `{output}`, `{certificate}`, `{key}`)
    pub command: Option<String>,

    /// Path of the signed archive; `{version}` is substituted
    pub output: Option<String>,
}

/// Publish step settings
#[derive(Debug, Deserialize)]
pub struct PublishConfig {
    /// Marketplace upload endpoint
    #[serde(default = "default_publish_url")]
    pub url: String,

    /// Marketplace plugin identifier
    #[serde(default)]
    pub plugin_id: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            url: default_publish_url(),
            plugin_id: None,
        }
    }
}

fn default_publish_url() -> String {
    "https://plugins.jetbrains.com/plugin/uploadPlugin".to_string()
}

/// Host IDE settings
#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    /// Host executable, either a path or a name looked up in PATH
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Arguments passed before the launch flags
    #[serde(default)]
    pub args: Vec<String>,

    /// Interface the robot server binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Robot server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Additional `-Dkey=value` system properties
    #[serde(default)]
    pub extra_flags: BTreeMap<String, String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            executable: None,
            args: Vec::new(),
            bind: default_bind(),
            port: default_port(),
            extra_flags: BTreeMap::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8082
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// How long the host may take to answer its first readiness probe
    #[serde(default = "default_launch")]
    pub launch_secs: u64,

    /// Delay between readiness probes
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// Timeout for a single control command round trip
    #[serde(default = "default_command")]
    pub command_secs: u64,

    /// Timeout for a whole verification run
    #[serde(default = "default_run")]
    pub run_secs: u64,

    /// Grace period for the teardown command before the host is killed
    #[serde(default = "default_shutdown")]
    pub shutdown_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            launch_secs: default_launch(),
            probe_interval_ms: default_probe_interval(),
            command_secs: default_command(),
            run_secs: default_run(),
            shutdown_ms: default_shutdown(),
        }
    }
}

fn default_launch() -> u64 {
    120
}
fn default_probe_interval() -> u64 {
    500
}
fn default_command() -> u64 {
    30
}
fn default_run() -> u64 {
    1800
}
fn default_shutdown() -> u64 {
    2000
}

impl Config {
    /// Load configuration
    ///
    /// Looks for `pluginctl.toml` in the working directory first, then the
    /// user config file. Returns default configuration if neither exists.
    pub fn load() -> Result<Self> {
        let local = PathBuf::from(PROJECT_CONFIG_FILE);
        if local.exists() {
            return Self::load_from(&local);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = super::Error::read_file(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Resolve the archive produced by the build step for `version`
    pub fn build_artifact(&self, version: &str) -> Option<PathBuf> {
        self.build
            .artifact
            .as_deref()
            .map(|a| PathBuf::from(a.replace("{version}", version)))
    }

    /// Resolve the signed archive path for `version`
    ///
    /// Defaults to `<artifact stem>-signed.zip` next to the build artifact.
    pub fn signed_artifact(&self, version: &str) -> Option<PathBuf> {
        if let Some(output) = &self.signing.output {
            return Some(PathBuf::from(output.replace("{version}", version)));
        }
        self.build_artifact(version).map(|artifact| {
            let stem = artifact
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "plugin".to_string());
            artifact.with_file_name(format!("{stem}-signed.zip"))
        })
    }
}
