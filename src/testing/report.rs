//! Scenario results and the run report

use std::fmt;
use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use serde::{Serialize, Serializer};

use crate::common::{Error, Result};

/// Why a scenario could not produce a pass/fail verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ErrorCause {
    /// Not attempted: the session was gone before its turn
    SessionTerminated,
    /// In flight when the run was cancelled or timed out
    Cancelled,
    /// A declared capability could not be resolved
    Dependency(String),
    /// Fixture preparation failed
    Setup(String),
    /// Control protocol or I/O failure while running
    Protocol(String),
    /// The scenario body panicked
    Panicked(String),
}

impl ErrorCause {
    /// Classify an error returned from setup
    pub fn from_setup(error: &Error) -> Self {
        match error {
            Error::UnresolvedDependency(_) | Error::DependencyType { .. } => {
                Self::Dependency(error.to_string())
            }
            Error::SessionTerminated => Self::SessionTerminated,
            _ => Self::Setup(error.to_string()),
        }
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionTerminated => write!(f, "session terminated"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Dependency(msg) => write!(f, "dependency: {}", msg),
            Self::Setup(msg) => write!(f, "setup: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol: {}", msg),
            Self::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { reason: String },
    Errored { cause: ErrorCause },
}

impl Outcome {
    /// Outcome for an error returned by a scenario body
    ///
    /// Assertion failures and commands the host rejected are verdicts;
    /// everything else means the scenario could not be judged.
    pub fn from_body_error(error: &Error) -> Self {
        match error {
            Error::TestAssertion(_) | Error::CommandFailed { .. } => Self::Failed {
                reason: error.to_string(),
            },
            Error::UnresolvedDependency(_) | Error::DependencyType { .. } => Self::Errored {
                cause: ErrorCause::Dependency(error.to_string()),
            },
            Error::SessionTerminated => Self::errored(ErrorCause::SessionTerminated),
            Error::Cancelled => Self::errored(ErrorCause::Cancelled),
            _ => Self::errored(ErrorCause::Protocol(error.to_string())),
        }
    }

    pub fn errored(cause: ErrorCause) -> Self {
        Self::Errored { cause }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, Self::Errored { .. })
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Result of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub id: String,
    pub outcome: Outcome,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl ScenarioResult {
    pub fn new(id: impl Into<String>, outcome: Outcome, duration: Duration) -> Self {
        Self {
            id: id.into(),
            outcome,
            duration,
        }
    }
}

/// All results of a run, in declaration order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub results: Vec<ScenarioResult>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl RunReport {
    pub fn new(results: Vec<ScenarioResult>, duration: Duration) -> Self {
        Self { results, duration }
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.outcome.is_passed())
    }

    /// Number of scenarios that failed or errored
    pub fn not_passed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !r.outcome.is_passed())
            .count()
    }

    /// Print a colored summary to stdout
    pub fn print(&self) {
        println!("\n{}", "Results:".cyan());
        for result in &self.results {
            let elapsed = format!("({}ms)", result.duration.as_millis()).dimmed();
            match &result.outcome {
                Outcome::Passed => {
                    println!("  {} {} {}", "✓".green(), result.id, elapsed)
                }
                Outcome::Failed { reason } => {
                    println!("  {} {} {}", "✗".red(), result.id, elapsed);
                    println!("      {}", reason.red());
                }
                Outcome::Errored { cause } => {
                    println!("  {} {} {}", "!".yellow(), result.id, elapsed);
                    println!("      {}", cause.to_string().yellow());
                }
            }
        }

        let failed = self
            .results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
            .count();
        let errored = self.results.iter().filter(|r| r.outcome.is_errored()).count();
        let passed = self.results.len() - failed - errored;

        let summary = format!(
            "{} passed, {} failed, {} errored in {:.1}s",
            passed,
            failed,
            errored,
            self.duration.as_secs_f64()
        );
        if self.all_passed() {
            println!("\n{} {}", "✓".green().bold(), summary.green().bold());
        } else {
            println!("\n{} {}", "✗".red().bold(), summary.red().bold());
        }
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
