//! pluginctl - release pipeline and UI test orchestrator for IDE plugins
//!
//! Resolves versions, channels and change notes from the project's own
//! documents, builds, signs and publishes the plugin, and drives a host IDE
//! through UI scenarios before anything is shipped.

use clap::Parser;
use std::path::PathBuf;

use commands::Commands;
use pluginctl::common::config::Config;
use pluginctl::common::logging;
use pluginctl::{cli, commands, Result};

#[derive(Parser)]
#[command(name = "pluginctl", about = "Release and UI-verify IDE plugins")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: ./pluginctl.toml, then the user config)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Plugin version to use instead of [plugin] version
    #[arg(long, global = true, value_name = "VERSION")]
    plugin_version: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Long runs also log to a file; the guard flushes it on exit
    let log_guard = match &cli.command {
        Commands::Verify { .. } | Commands::Release { .. } => {
            let file = format!("{}.log", chrono::Local::now().format("run-%Y%m%d-%H%M%S"));
            logging::init_with_file(&file).map(|(path, guard)| {
                tracing::info!("Logging to {}", path.display());
                guard
            })
        }
        _ => {
            logging::init_cli();
            None
        }
    };

    let result = match load_config(cli.config.as_ref()) {
        Ok(config) => cli::dispatch(cli.command, &config, cli.plugin_version.as_deref()).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        // exit() skips destructors
        drop(log_guard);
        std::process::exit(1);
    }
}
