//! CLI command handling
//!
//! Dispatches CLI commands to the release pipeline and the scenario runner
//! and formats their output.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{parse_endpoint, Error, Result};
use crate::host::{start_session, LaunchFlags};
use crate::release::description::extract_description;
use crate::release::metadata::resolve_version;
use crate::release::pipeline::{self, ReleaseOptions};
use crate::release::signing::{PublishToken, SigningMaterial};
use crate::release::{derive_channel, resolve_change_notes, Changelog, PluginMetadata};
use crate::testing::{
    self, CancelToken, Container, Scenario, ScriptedScenario, SessionTarget, VerifyPlan,
};

/// Dispatch a CLI command
///
/// `plugin_version` is the global `--plugin-version` override; a version
/// given to the subcommand itself takes precedence over it.
pub async fn dispatch(command: Commands, config: &Config, plugin_version: Option<&str>) -> Result<()> {
    match command {
        Commands::Channel { version } => {
            let version = resolve_version(config, version.as_deref().or(plugin_version))?;
            let channel = derive_channel(version.as_str())?;
            println!("{}", channel);
            Ok(())
        }

        Commands::Notes { version, format } => {
            let version = resolve_version(config, version.as_deref().or(plugin_version))?;
            let text = Error::read_file(&config.plugin.changelog)?;
            let changelog = Changelog::parse(&text, &config.plugin.unreleased_label);
            println!("{}", resolve_change_notes(&version, changelog.entries(), format)?);
            Ok(())
        }

        Commands::Describe => {
            let readme = Error::read_file(&config.plugin.readme)?;
            println!("{}", extract_description(&readme)?);
            Ok(())
        }

        Commands::PatchChangelog { version, date } => {
            let version = resolve_version(config, version.as_deref().or(plugin_version))?;
            let date = date.unwrap_or_else(today);
            if pipeline::patch_changelog(config, &version, &date)? {
                println!(
                    "{} {} released on {}",
                    "✓".green(),
                    version.to_string().bold(),
                    date
                );
            } else {
                println!("{} already has a changelog entry", version);
            }
            Ok(())
        }

        Commands::Metadata => {
            let metadata = PluginMetadata::resolve(config, plugin_version)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(())
        }

        Commands::Build => {
            let metadata = PluginMetadata::resolve(config, plugin_version)?;
            let artifact = pipeline::build(config, &metadata).await?;
            println!("{} Built {}", "✓".green(), artifact.display());
            Ok(())
        }

        Commands::Sign { artifact } => {
            let metadata = PluginMetadata::resolve(config, plugin_version)?;
            let artifact = match artifact {
                Some(path) => path,
                None => config
                    .build_artifact(metadata.version.as_str())
                    .ok_or_else(|| Error::Config("[build] artifact is not set".to_string()))?,
            };
            let material = SigningMaterial::from_env()?;
            let signed = pipeline::sign(config, &metadata, &artifact, &material).await?;
            println!("{} Signed {}", "✓".green(), signed.display());
            Ok(())
        }

        Commands::Verify {
            scenarios,
            attach,
            port,
            report,
        } => {
            let target = match attach {
                Some(address) => SessionTarget::Attach(parse_endpoint(&address)?),
                None => SessionTarget::Launch(launch_flags(config, port)),
            };
            let plan = verify_plan(config, target, &scenarios)?;
            let report_data = testing::verify(config, plan).await?;

            report_data.print();
            if let Some(path) = report {
                report_data.write_json(&path)?;
                println!("Report written to {}", path.display());
            }

            if report_data.all_passed() {
                Ok(())
            } else {
                Err(Error::step_failed(
                    "verify",
                    format!(
                        "{} of {} scenarios did not pass",
                        report_data.not_passed(),
                        report_data.results.len()
                    ),
                ))
            }
        }

        Commands::RunHost { port } => {
            let flags = launch_flags(config, port);
            println!("{}", "Starting host...".cyan());
            println!("  {}", flags.to_args().join(" ").dimmed());

            let mut session = start_session(&config.host, flags, &config.timeouts).await?;
            println!(
                "  {} Robot server listening on {}",
                "✓".green(),
                session.address()
            );
            if let Some(pid) = session.pid() {
                println!("  PID: {}", pid.to_string().dimmed());
            }
            println!("Press Ctrl-C to stop the host.");

            let stopped = tokio::signal::ctrl_c().await;
            session.shutdown().await;
            stopped?;
            Ok(())
        }

        Commands::Publish { artifact, dry_run } => {
            let metadata = PluginMetadata::resolve(config, plugin_version)?;
            let artifact = publish_artifact(config, &metadata, artifact)?;

            if dry_run {
                let entries = pipeline::inspect_artifact(&artifact)?;
                println!(
                    "Dry run: would publish {} ({} entries) to channel '{}'",
                    artifact.display(),
                    entries,
                    metadata.channel
                );
                return Ok(());
            }

            let token = PublishToken::from_env()?;
            pipeline::publish(config, &metadata, &artifact, &token).await?;
            println!(
                "{} Published {} to channel '{}'",
                "✓".green(),
                metadata.version,
                metadata.channel
            );
            Ok(())
        }

        Commands::Release {
            skip_verify,
            dry_run,
            scenarios,
        } => {
            let verify = if skip_verify {
                None
            } else if scenarios.is_empty() {
                return Err(Error::Config(
                    "No scenarios given; pass scenario files or --skip-verify".to_string(),
                ));
            } else {
                let target = SessionTarget::Launch(launch_flags(config, None));
                Some(verify_plan(config, target, &scenarios)?)
            };

            let summary =
                pipeline::release(config, plugin_version, ReleaseOptions { dry_run, verify }).await?;

            if let Some(report) = &summary.verification {
                report.print();
            }
            println!(
                "\n{} {} {} ({})",
                "✓".green().bold(),
                summary.metadata.name.bold(),
                summary.metadata.version,
                summary.metadata.channel
            );
            println!("  Artifact: {}", summary.artifact.display());
            if summary.published {
                println!("  Published");
            } else {
                println!("  {}", "Not published (dry run)".dimmed());
            }
            Ok(())
        }
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn launch_flags(config: &Config, port: Option<u16>) -> LaunchFlags {
    let flags = LaunchFlags::from_config(&config.host);
    match port {
        Some(port) => flags.with_port(port),
        None => flags,
    }
}

/// Load the scenario files and wire up the container and Ctrl-C handling
fn verify_plan(config: &Config, target: SessionTarget, paths: &[PathBuf]) -> Result<VerifyPlan> {
    let scenarios = load_scenarios(paths)?;
    let address = match &target {
        SessionTarget::Attach(address) => *address,
        SessionTarget::Launch(flags) => parse_endpoint(&format!("{}:{}", config.host.bind, flags.port))?,
    };

    Ok(VerifyPlan {
        target,
        scenarios,
        container: build_container(config, address),
        cancel: cancel_on_ctrl_c(),
    })
}

fn load_scenarios(paths: &[PathBuf]) -> Result<Vec<Arc<dyn Scenario>>> {
    paths
        .iter()
        .map(|path| load_scenario(path))
        .collect()
}

fn load_scenario(path: &Path) -> Result<Arc<dyn Scenario>> {
    let scenario = ScriptedScenario::load(path)?;
    Ok(Arc::new(scenario))
}

/// Capabilities every scenario may ask for: the host address plus the
/// `[fixtures]` table
fn build_container(config: &Config, address: SocketAddr) -> Container {
    config.fixtures.iter().fold(
        Container::new().instance("host.address", address.to_string()),
        |container, (name, value)| container.instance(name, value.clone()),
    )
}

fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, stopping the run...".yellow());
            token.cancel();
        }
    });
    cancel
}

/// The archive to publish: the explicit path, else the configured signed output
fn publish_artifact(
    config: &Config,
    metadata: &PluginMetadata,
    explicit: Option<PathBuf>,
) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => config
            .signed_artifact(metadata.version.as_str())
            .ok_or_else(|| {
                Error::Config(
                    "no artifact to publish: pass a path or set [signing] output or [build] artifact"
                        .to_string(),
                )
            }),
    }
}
