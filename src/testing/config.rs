//! Scripted scenario file format
//!
//! Defines the data structures for deserializing YAML scenarios.

use serde::Deserialize;
use serde_json::Value;

/// A complete scenario loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioFile {
    /// Name of the scenario, used as its result identifier
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Capabilities the scenario needs from the container
    #[serde(default)]
    pub requires: Vec<String>,
    /// Optional fixture preparation run before the scenario's turn
    pub setup: Option<Vec<SetupStep>>,
    /// The sequence of steps to execute against the host
    pub steps: Vec<TestStep>,
}

/// A setup step that runs before the scenario
#[derive(Deserialize, Debug, Clone)]
pub struct SetupStep {
    /// Shell command to execute; `${capability}` placeholders are expanded
    pub shell: String,
}

/// A single step in the scenario flow
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Send a control command to the host
    Command {
        /// Command name (the robot server endpoint)
        command: String,
        /// JSON arguments; `${capability}` placeholders in strings are expanded
        #[serde(default = "empty_arguments")]
        arguments: Value,
        /// Optional expectations for the command result
        expect: Option<CommandExpectation>,
    },
    /// Pause the scenario
    Wait {
        /// Milliseconds to wait
        millis: u64,
    },
    /// Check that the host still answers its readiness probe
    Probe,
}

fn empty_arguments() -> Value {
    Value::Object(Default::default())
}

/// Expectations for a command result
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CommandExpectation {
    /// Whether the host should accept the command (default: true)
    pub success: Option<bool>,
    /// Substring that should appear in the JSON-encoded result
    pub result_contains: Option<String>,
    /// Exact expected result
    pub result_equals: Option<Value>,
}
