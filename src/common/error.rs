//! Error types for pluginctl
//!
//! Error messages are written to be actionable from a CI log: where a
//! configuration or environment change fixes the problem, the message says so.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pluginctl
#[derive(Error, Debug)]
pub enum Error {
    // === Version & Changelog Errors ===
    #[error("Invalid version format: {0:?}. Set [plugin] version or pass --plugin-version")]
    InvalidVersionFormat(String),

    #[error("No changelog entry for version '{0}' and no Unreleased entry to fall back to")]
    ChangelogEntryNotFound(String),

    #[error("Changelog has {count} entries marked Unreleased ({headings}); keep exactly one")]
    AmbiguousUnreleasedEntry { count: usize, headings: String },

    #[error("Plugin description section not found in README: expected '{start}' ... '{end}'")]
    DescriptionNotFound { start: String, end: String },

    // === Host Launch Errors ===
    #[error("Host did not answer the readiness probe within {0} seconds")]
    LaunchTimeout(u64),

    #[error("Control port {port} is unavailable: {reason}")]
    PortUnavailable { port: u16, reason: String },

    #[error("Host failed to start: {0}")]
    HostStartFailed(String),

    #[error("Host exited before becoming ready (exit code {0:?})")]
    HostExited(Option<i32>),

    // === Session Errors ===
    #[error("Session terminated")]
    SessionTerminated,

    #[error("Run cancelled")]
    Cancelled,

    #[error("Cannot {action} while session is {state}")]
    InvalidState { action: String, state: String },

    // === Dependency Injection Errors ===
    #[error("No provider registered for capability '{0}'")]
    UnresolvedDependency(String),

    #[error("Capability '{capability}' is not a {expected}")]
    DependencyType { capability: String, expected: String },

    // === Control Protocol Errors ===
    #[error("Control protocol error: {0}")]
    Protocol(String),

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("{operation} timed out after {}ms", .elapsed.as_millis())]
    Timeout { operation: String, elapsed: Duration },

    // === Pipeline Errors ===
    #[error("Environment variable {0} is not set")]
    MissingSecret(String),

    #[error("{step} step failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("Artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Invalid artifact '{}': {reason}", .path.display())]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error("Publish rejected with HTTP {status}: {message}")]
    PublishFailed { status: u16, message: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: &str, message: &str) -> Self {
        Self::CommandFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a step failed error
    pub fn step_failed(step: &str, message: impl Into<String>) -> Self {
        Self::StepFailed {
            step: step.to_string(),
            message: message.into(),
        }
    }

    /// Create a timeout error for a named operation
    pub fn timeout(operation: &str, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            elapsed,
        }
    }

    /// Read a file, mapping failures to [`Error::FileRead`]
    pub fn read_file(path: &std::path::Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| Self::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }
}
