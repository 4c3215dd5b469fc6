//! UI test orchestration
//!
//! Scenarios declare the capabilities they need, get them from a
//! [`Container`] the caller builds, and run one at a time against a single
//! host session. Scripted scenarios are read from YAML files.

mod config;
pub mod container;
pub mod report;
pub mod runner;
pub mod scenario;

pub use config::{CommandExpectation, ScenarioFile, SetupStep, TestStep};
pub use container::{Container, Dependencies};
pub use report::{ErrorCause, Outcome, RunReport, ScenarioResult};
pub use runner::{run_scenarios, verify, CancelToken, RunOptions, SessionTarget, VerifyPlan};
pub use scenario::{Scenario, ScenarioContext, ScriptedScenario};
