//! Pipeline steps: build, sign, verify, patch changelog, publish
//!
//! Build and signing are external commands; this module only wires their
//! inputs and checks their outputs. Resolver failures happen in
//! [`PluginMetadata::resolve`] before any step runs, so a bad version or
//! changelog never reaches the publish step.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::testing::{self, RunReport, VerifyPlan};

use super::changelog::Changelog;
use super::metadata::PluginMetadata;
use super::signing::{env_lookup, PublishToken, SigningMaterial, PRIVATE_KEY_PASSWORD_VAR};
use super::version::Version;

/// Options for a full release run
pub struct ReleaseOptions {
    /// Resolve, build and sign, but transmit nothing and leave the changelog alone
    pub dry_run: bool,
    /// UI verification to run against the signed build; `None` skips it
    pub verify: Option<VerifyPlan>,
}

/// Outcome of a release run
#[derive(Debug)]
pub struct ReleaseSummary {
    pub metadata: PluginMetadata,
    pub artifact: PathBuf,
    pub verification: Option<RunReport>,
    pub published: bool,
}

/// Quote a value for interpolation into a `sh -c` command line
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Run a pipeline command through the shell with the plugin environment
async fn run_step(
    step: &str,
    command: &str,
    metadata: &PluginMetadata,
    metadata_file: &Path,
    extra_env: &[(&str, &str)],
) -> Result<()> {
    tracing::info!(step, "Running: {}", command);

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env("PLUGIN_VERSION", metadata.version.as_str())
        .env("PLUGIN_CHANNEL", metadata.channel.name())
        .env("PLUGIN_METADATA", metadata_file)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    for (key, value) in extra_env {
        cmd.env(key, value);
    }

    let status = cmd
        .status()
        .await
        .map_err(|e| Error::step_failed(step, format!("failed to execute: {}", e)))?;

    if !status.success() {
        return Err(Error::step_failed(
            step,
            format!("command exited with code {:?}", status.code()),
        ));
    }
    Ok(())
}

/// Check that `path` is a readable zip archive, returning its entry count
pub fn inspect_artifact(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Err(Error::ArtifactNotFound(path.to_path_buf()));
    }
    let file = std::fs::File::open(path)?;
    let archive = zip::ZipArchive::new(file).map_err(|e| Error::InvalidArtifact {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if archive.is_empty() {
        return Err(Error::InvalidArtifact {
            path: path.to_path_buf(),
            reason: "archive is empty".to_string(),
        });
    }
    Ok(archive.len())
}

/// Run the configured build command and validate the produced archive
pub async fn build(config: &Config, metadata: &PluginMetadata) -> Result<PathBuf> {
    let command = config
        .build
        .command
        .as_deref()
        .ok_or_else(|| Error::Config("[build] command is not set".to_string()))?;
    let artifact = config
        .build_artifact(metadata.version.as_str())
        .ok_or_else(|| Error::Config("[build] artifact is not set".to_string()))?;

    let metadata_file = metadata.write_to(&paths::work_dir())?;
    run_step("build", command, metadata, &metadata_file, &[]).await?;

    let entries = inspect_artifact(&artifact)?;
    tracing::info!("Built {} ({} entries)", artifact.display(), entries);
    Ok(artifact)
}

/// Sign `artifact` with the configured signer command
///
/// The command template may use `{input}`, `{output}`, `{certificate}` and
/// `{key}`. The key password is passed as `PRIVATE_KEY_PASSWORD`.
pub async fn sign(
    config: &Config,
    metadata: &PluginMetadata,
    artifact: &Path,
    material: &SigningMaterial,
) -> Result<PathBuf> {
    let template = config
        .signing
        .command
        .as_deref()
        .ok_or_else(|| Error::Config("[signing] command is not set".to_string()))?;
    let output = config
        .signed_artifact(metadata.version.as_str())
        .ok_or_else(|| {
            Error::Config("set [signing] output or [build] artifact to name the signed archive".to_string())
        })?;

    inspect_artifact(artifact)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let files = material.write_files()?;
    let command = template
        .replace("{input}", &shell_quote(&artifact.to_string_lossy()))
        .replace("{output}", &shell_quote(&output.to_string_lossy()))
        .replace("{certificate}", &shell_quote(&files.certificate.to_string_lossy()))
        .replace("{key}", &shell_quote(&files.key.to_string_lossy()));

    let metadata_file = metadata.write_to(&paths::work_dir())?;
    run_step(
        "sign",
        &command,
        metadata,
        &metadata_file,
        &[(PRIVATE_KEY_PASSWORD_VAR, material.password.expose())],
    )
    .await?;
    drop(files);

    inspect_artifact(&output)?;
    tracing::info!("Signed {}", output.display());
    Ok(output)
}

/// Rename the unreleased changelog entry to the release version
///
/// Returns whether the file changed.
pub fn patch_changelog(config: &Config, version: &Version, date: &str) -> Result<bool> {
    let path = &config.plugin.changelog;
    let text = Error::read_file(path)?;
    let changelog = Changelog::parse(&text, &config.plugin.unreleased_label);

    match changelog.patch(version, date)? {
        Some(patched) => {
            std::fs::write(path, patched)?;
            tracing::info!("Patched {} for {}", path.display(), version);
            Ok(true)
        }
        None => {
            tracing::debug!("{} already has an entry for {}", path.display(), version);
            Ok(false)
        }
    }
}

/// Upload `artifact` to the marketplace on the metadata's channel
pub async fn publish(
    config: &Config,
    metadata: &PluginMetadata,
    artifact: &Path,
    token: &PublishToken,
) -> Result<()> {
    let plugin_id = config
        .publish
        .plugin_id
        .as_deref()
        .ok_or_else(|| Error::Config("[publish] plugin_id is not set".to_string()))?;

    inspect_artifact(artifact)?;
    let file = tokio::fs::File::open(artifact).await?;
    let length = file.metadata().await?.len();
    let file_name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "plugin.zip".to_string());

    let part = reqwest::multipart::Part::stream_with_length(reqwest::Body::from(file), length)
        .file_name(file_name)
        .mime_str("application/zip")?;
    let form = reqwest::multipart::Form::new()
        .text("pluginId", plugin_id.to_string())
        .text("channel", metadata.channel.name().to_string())
        .part("file", part);

    tracing::info!(
        channel = %metadata.channel,
        "Uploading {} to {}",
        artifact.display(),
        config.publish.url
    );

    let response = reqwest::Client::new()
        .post(&config.publish.url)
        .bearer_auth(token.0.expose())
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(Error::PublishFailed {
            status: status.as_u16(),
            message,
        });
    }

    tracing::info!("Published {} to channel '{}'", metadata.version, metadata.channel);
    Ok(())
}

/// Resolve → build → sign → verify → patch changelog → publish
pub async fn release(
    config: &Config,
    version_override: Option<&str>,
    options: ReleaseOptions,
) -> Result<ReleaseSummary> {
    release_with_secrets(config, version_override, options, env_lookup).await
}

/// [`release`] with signing and publish secrets read through `secrets`
pub async fn release_with_secrets<F>(
    config: &Config,
    version_override: Option<&str>,
    options: ReleaseOptions,
    secrets: F,
) -> Result<ReleaseSummary>
where
    F: Fn(&str) -> Option<String>,
{
    let metadata = PluginMetadata::resolve(config, version_override)?;

    let material = SigningMaterial::from_lookup(&secrets)?;
    let token = if options.dry_run {
        None
    } else {
        Some(PublishToken::from_lookup(&secrets)?)
    };

    let built = build(config, &metadata).await?;
    let artifact = sign(config, &metadata, &built, &material).await?;

    let verification = match options.verify {
        Some(plan) => {
            let report = testing::verify(config, plan).await?;
            if !report.all_passed() {
                return Err(Error::step_failed(
                    "verify",
                    format!("{} of {} scenarios did not pass", report.not_passed(), report.results.len()),
                ));
            }
            Some(report)
        }
        None => None,
    };

    let published = match token {
        Some(token) => {
            let today = chrono::Local::now().format("%Y-%m-%d").to_string();
            patch_changelog(config, &metadata.version, &today)?;
            publish(config, &metadata, &artifact, &token).await?;
            true
        }
        None => {
            tracing::info!(
                "Dry run: not publishing {} to channel '{}'",
                artifact.display(),
                metadata.channel
            );
            false
        }
    };

    Ok(ReleaseSummary {
        metadata,
        artifact,
        verification,
        published,
    })
}
