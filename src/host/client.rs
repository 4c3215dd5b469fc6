//! Control channel to the host's robot server
//!
//! The robot server speaks JSON over HTTP/1.1: `GET /hello` answers once the
//! host is ready, and every command is a `POST /<command>` whose body carries
//! the arguments and whose response body carries the result.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{Error, Result};

/// Command that asks the host to exit
pub const TEARDOWN_COMMAND: &str = "exit";

/// Request/response channel to a running host
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Readiness probe; succeeds once the host accepts commands
    async fn probe(&self) -> Result<()>;

    /// Send a command and wait up to `timeout` for its result
    async fn send(&self, command: &str, arguments: Value, timeout: Duration) -> Result<Value>;

    /// Ask the host to exit
    async fn teardown(&self, timeout: Duration) -> Result<()> {
        self.send(TEARDOWN_COMMAND, Value::Object(Default::default()), timeout)
            .await
            .map(|_| ())
    }
}

/// HTTP client for the robot server
pub struct RobotClient {
    http: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
}

impl RobotClient {
    pub fn new(address: SocketAddr, probe_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(1)
            .build()?;
        Ok(Self {
            http,
            base_url: format!("http://{}", address),
            probe_timeout,
        })
    }

    fn map_error(operation: &str, timeout: Duration, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(operation, timeout)
        } else if e.is_connect() {
            Error::Protocol(format!("{}: connection failed: {}", operation, e))
        } else {
            Error::Protocol(format!("{}: {}", operation, e))
        }
    }
}

#[async_trait]
impl ControlChannel for RobotClient {
    async fn probe(&self) -> Result<()> {
        let response = self
            .http
            .get(format!("{}/hello", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| Self::map_error("probe", self.probe_timeout, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "probe answered HTTP {}",
                response.status()
            )))
        }
    }

    async fn send(&self, command: &str, arguments: Value, timeout: Duration) -> Result<Value> {
        tracing::debug!("robot >>> {} {}", command, arguments);

        let response = self
            .http
            .post(format!("{}/{}", self.base_url, command))
            .json(&arguments)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(command, timeout, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(command, timeout, e))?;
        tracing::debug!("robot <<< {} {} {}", command, status, body);

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or_else(|| {
                    if body.trim().is_empty() {
                        format!("HTTP {}", status)
                    } else {
                        body.trim().to_string()
                    }
                });
            return Err(Error::command_failed(command, &message));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::Protocol(format!("{}: invalid JSON response: {}", command, e)))
    }
}
