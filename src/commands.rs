//! CLI command definitions
//!
//! Defines the clap commands for pluginctl.

use clap::Subcommand;
use std::path::PathBuf;

use crate::release::OutputType;

#[derive(Subcommand)]
pub enum Commands {
    /// Print the release channel derived from a version
    Channel {
        /// Version to inspect (default: the configured plugin version)
        version: Option<String>,
    },

    /// Print the change notes for a version
    Notes {
        /// Version to resolve (default: the configured plugin version)
        version: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value_t = OutputType::Html)]
        format: OutputType,
    },

    /// Print the plugin description extracted from the README as HTML
    Describe,

    /// Rename the Unreleased changelog entry to a released version
    PatchChangelog {
        /// Version to release (default: the configured plugin version)
        version: Option<String>,

        /// Release date (default: today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Print the resolved plugin metadata as JSON
    Metadata,

    /// Run the configured build command
    Build,

    /// Sign a built plugin archive
    Sign {
        /// Archive to sign (default: the configured build artifact)
        artifact: Option<PathBuf>,
    },

    /// Run UI scenarios against a host session
    Verify {
        /// YAML scenario files, run in the given order
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Use a host already listening at ADDR instead of launching one
        #[arg(long, value_name = "ADDR")]
        attach: Option<String>,

        /// Control port for a launched host (default: [host] port)
        #[arg(long)]
        port: Option<u16>,

        /// Write the run report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Launch the host with automation flags and keep it running until Ctrl-C
    RunHost {
        /// Control port (default: [host] port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Upload a signed plugin archive
    Publish {
        /// Archive to upload (default: the configured signed artifact)
        artifact: Option<PathBuf>,

        /// Resolve and check everything, but upload nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Build, sign, verify, patch the changelog and publish
    Release {
        /// Skip UI verification
        #[arg(long)]
        skip_verify: bool,

        /// Resolve, build, sign and verify, but publish nothing
        #[arg(long)]
        dry_run: bool,

        /// YAML scenario files to verify the signed build with
        scenarios: Vec<PathBuf>,
    },
}
