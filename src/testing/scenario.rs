//! Scenarios and the context they run in

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command as TokioCommand;

use crate::common::{Error, Result};
use crate::host::ControlChannel;

use super::config::{CommandExpectation, ScenarioFile, TestStep};
use super::container::Dependencies;

/// A unit of UI verification run against a host session
///
/// `prepare` may run concurrently with other scenarios' bodies; `run` only
/// ever runs while the scenario holds the session exclusively.
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Identifier used in the report
    fn id(&self) -> &str;

    /// Capabilities to resolve from the container before `prepare`
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fixture preparation
    async fn prepare(&self, _deps: &Dependencies) -> Result<()> {
        Ok(())
    }

    /// Scenario body. Return [`Error::TestAssertion`] for a failed check.
    async fn run(&self, ctx: &ScenarioContext) -> Result<()>;
}

/// What a scenario body can reach
pub struct ScenarioContext {
    channel: Arc<dyn ControlChannel>,
    deps: Dependencies,
    command_timeout: Duration,
}

impl ScenarioContext {
    pub fn new(channel: Arc<dyn ControlChannel>, deps: Dependencies, command_timeout: Duration) -> Self {
        Self {
            channel,
            deps,
            command_timeout,
        }
    }

    /// Send a command to the host and wait for its result
    pub async fn send(&self, command: &str, arguments: Value) -> Result<Value> {
        self.channel
            .send(command, arguments, self.command_timeout)
            .await
    }

    /// Readiness probe against the host
    pub async fn probe(&self) -> Result<()> {
        self.channel.probe().await
    }

    /// Typed access to a resolved capability
    pub fn dependency<T: std::any::Any + Send + Sync>(&self, capability: &str) -> Result<Arc<T>> {
        self.deps.get(capability)
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.deps
    }
}

/// A scenario described by a YAML file
#[derive(Debug, Clone)]
pub struct ScriptedScenario {
    file: ScenarioFile,
}

impl ScriptedScenario {
    /// Load a scenario from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read test scenario '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ScenarioFile = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))?;
        Ok(Self { file })
    }
}

#[async_trait]
impl Scenario for ScriptedScenario {
    fn id(&self) -> &str {
        &self.file.name
    }

    fn requires(&self) -> Vec<String> {
        self.file.requires.clone()
    }

    async fn prepare(&self, deps: &Dependencies) -> Result<()> {
        for step in self.file.setup.iter().flatten() {
            let shell = deps.expand(&step.shell);
            tracing::debug!(scenario = %self.file.name, "Setup: {}", shell);

            let status = TokioCommand::new("sh")
                .arg("-c")
                .arg(&shell)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|e| Error::step_failed("setup", format!("failed to execute: {}", e)))?;

            if !status.success() {
                return Err(Error::step_failed(
                    "setup",
                    format!("'{}' failed with exit code {:?}", shell, status.code()),
                ));
            }
        }
        Ok(())
    }

    async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
        for (i, step) in self.file.steps.iter().enumerate() {
            let step_num = i + 1;
            match step {
                TestStep::Command {
                    command,
                    arguments,
                    expect,
                } => {
                    let arguments = expand_value(arguments, ctx.dependencies());
                    execute_command_step(ctx, command, arguments, expect.as_ref()).await?;
                }
                TestStep::Wait { millis } => {
                    tokio::time::sleep(Duration::from_millis(*millis)).await;
                }
                TestStep::Probe => ctx.probe().await?,
            }
            tracing::info!(scenario = %self.file.name, "Step {} ok", step_num);
        }
        Ok(())
    }
}

/// Execute a command step and check its expectations
async fn execute_command_step(
    ctx: &ScenarioContext,
    command: &str,
    arguments: Value,
    expect: Option<&CommandExpectation>,
) -> Result<()> {
    let result = ctx.send(command, arguments).await;
    let should_succeed = expect.and_then(|e| e.success).unwrap_or(true);

    let value = match result {
        Ok(value) if should_succeed => value,
        Ok(_) => {
            return Err(Error::TestAssertion(format!(
                "Command '{}' expected to be rejected, but succeeded",
                command
            )))
        }
        Err(Error::CommandFailed { .. }) if !should_succeed => return Ok(()),
        Err(e) => return Err(e),
    };

    let Some(exp) = expect else {
        return Ok(());
    };

    if let Some(expected) = &exp.result_equals {
        if &value != expected {
            return Err(Error::TestAssertion(format!(
                "Command '{}': expected result {}, got {}",
                command, expected, value
            )));
        }
    }

    if let Some(substr) = &exp.result_contains {
        let rendered = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !rendered.contains(substr.as_str()) {
            return Err(Error::TestAssertion(format!(
                "Command '{}': expected result containing '{}', got {}",
                command, substr, rendered
            )));
        }
    }

    Ok(())
}

/// Expand `${capability}` placeholders in every string of a JSON value
fn expand_value(value: &Value, deps: &Dependencies) -> Value {
    match value {
        Value::String(s) => Value::String(deps.expand(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, deps)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v, deps)))
                .collect(),
        ),
        other => other.clone(),
    }
}
