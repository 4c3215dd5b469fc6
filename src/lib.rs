//! pluginctl - release pipeline and UI test orchestrator for IDE plugins
//!
//! The library half holds the version and change-notes resolver, the release
//! pipeline steps, host session control and the scenario runner, so they can
//! be driven from tests as well as from the CLI.

pub mod cli;
pub mod commands;
pub mod common;
pub mod host;
pub mod release;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use host::{start_session, HostSession, HostState, LaunchFlags};
pub use release::{derive_channel, resolve_change_notes, ReleaseChannel, Version};
pub use testing::{run_scenarios, verify, Container, Outcome, RunReport, Scenario};
