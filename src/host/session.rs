//! Host session lifecycle
//!
//! A [`HostSession`] owns one running host process (or, when attached, only
//! the control channel to one) and tracks it through
//! `Starting -> Ready -> (Busy -> Ready)* -> Terminating -> Terminated`.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::{Child, Command};

use crate::common::config::{HostConfig, Timeouts};
use crate::common::{parse_endpoint, Error, Result};

use super::client::{ControlChannel, RobotClient};
use super::flags::LaunchFlags;

/// Host session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostState {
    /// Process spawned, robot server not answering yet
    Starting,
    /// Accepting commands
    Ready,
    /// A scenario holds the session
    Busy,
    /// Being shut down
    Terminating,
    /// Process gone, channel closed
    Terminated,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Busy => write!(f, "busy"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl HostState {
    fn can_become(self, next: HostState) -> bool {
        use HostState::*;
        match (self, next) {
            (Starting, Ready) | (Ready, Busy) | (Busy, Ready) | (Terminating, Terminated) => true,
            (Starting | Ready | Busy, Terminating) => true,
            _ => false,
        }
    }
}

/// One running (or attached) host
pub struct HostSession {
    /// Host process; `None` when attached to a host started elsewhere
    process: Option<Child>,
    address: SocketAddr,
    state: HostState,
    channel: Arc<dyn ControlChannel>,
    shutdown_grace: Duration,
}

impl HostSession {
    /// Session over an already-ready host reachable through `channel`
    pub fn attached(address: SocketAddr, channel: Arc<dyn ControlChannel>) -> Self {
        Self {
            process: None,
            address,
            state: HostState::Ready,
            channel,
            shutdown_grace: Duration::from_millis(500),
        }
    }

    /// Attach to a host whose robot server is already listening on `address`
    ///
    /// Probes until the host answers or `launch_secs` elapses. The host is
    /// not owned, so [`HostSession::shutdown`] asks it to exit but cannot
    /// kill it.
    pub async fn attach(address: SocketAddr, timeouts: &Timeouts) -> Result<Self> {
        let client = RobotClient::new(address, probe_timeout(timeouts))?;
        let mut session = Self::attached(address, Arc::new(client));
        session.state = HostState::Starting;
        session.shutdown_grace = Duration::from_millis(timeouts.shutdown_ms);
        session.wait_ready(timeouts).await?;
        session.transition(HostState::Ready)?;
        Ok(session)
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Process ID of the owned host, if any
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.id())
    }

    pub fn channel(&self) -> Arc<dyn ControlChannel> {
        Arc::clone(&self.channel)
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: HostState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(Error::invalid_state(&format!("become {}", next), self.state));
        }
        tracing::trace!("Host session {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Begin termination unless it has already begun
    pub fn begin_termination(&mut self) {
        if !matches!(self.state, HostState::Terminating | HostState::Terminated) {
            self.state = HostState::Terminating;
        }
    }

    /// Check whether the host is still usable, marking the session
    /// `Terminated` when it is not
    pub async fn check_alive(&mut self) -> bool {
        if self.state == HostState::Terminated {
            return false;
        }

        let process_running = match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        };
        let alive = process_running && self.channel.probe().await.is_ok();

        if !alive {
            tracing::warn!("Host at {} is gone", self.address);
            if let Some(mut child) = self.process.take() {
                kill_process(&mut child).await;
            }
            self.state = HostState::Terminated;
        }
        alive
    }

    async fn wait_ready(&mut self, timeouts: &Timeouts) -> Result<()> {
        let launch = Duration::from_secs(timeouts.launch_secs);
        let interval = Duration::from_millis(timeouts.probe_interval_ms.max(10));
        let deadline = Instant::now().checked_add(launch);

        loop {
            if let Some(child) = self.process.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(Error::HostExited(status.code()));
                }
            }

            match self.channel.probe().await {
                Ok(()) => return Ok(()),
                Err(e) => tracing::trace!("Probe of {} failed: {}", self.address, e),
            }

            // An unrepresentable deadline means waiting indefinitely
            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(Error::LaunchTimeout(timeouts.launch_secs))
                }
                Some(deadline) => interval.min(deadline - now),
                None => interval,
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Terminate the host and release the session
    ///
    /// Sends the teardown command, gives the host the grace period to exit,
    /// then kills its process group. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if self.state == HostState::Terminated {
            return;
        }
        self.begin_termination();

        if let Err(e) = self.channel.teardown(self.shutdown_grace).await {
            tracing::debug!("Teardown command failed: {}", e);
        }

        if let Some(mut child) = self.process.take() {
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("Host exited with {}", status),
                _ => {
                    tracing::debug!("Host did not exit within grace period, killing");
                    kill_process(&mut child).await;
                }
            }
        }

        self.state = HostState::Terminated;
        tracing::info!("Host session at {} terminated", self.address);
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        // Best-effort since we can't await in drop
        if let Some(child) = self.process.as_mut() {
            signal_group(child);
            let _ = child.start_kill();
        }
    }
}

fn probe_timeout(timeouts: &Timeouts) -> Duration {
    Duration::from_millis(timeouts.probe_interval_ms.max(1000))
}

/// Kill the host's process group (unix) and reap the process
async fn kill_process(child: &mut Child) {
    signal_group(child);
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(unix)]
fn signal_group(child: &Child) {
    if let Some(pid) = child.id() {
        // The host leads its own process group, so this reaches its children
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child) {}

/// Resolve the host executable from a path or a PATH lookup
fn resolve_executable(host: &HostConfig) -> Result<PathBuf> {
    let exe = host
        .executable
        .as_ref()
        .ok_or_else(|| Error::Config("[host] executable is not set".to_string()))?;

    if exe.is_absolute() || exe.components().count() > 1 {
        if exe.exists() {
            return Ok(exe.clone());
        }
        return Err(Error::HostStartFailed(format!(
            "{} does not exist",
            exe.display()
        )));
    }

    which::which(exe)
        .map_err(|_| Error::HostStartFailed(format!("'{}' not found in PATH", exe.display())))
}

/// Make sure nothing is already listening where the robot server will bind
async fn ensure_port_free(address: SocketAddr) -> Result<()> {
    if address.port() == 0 {
        return Err(Error::PortUnavailable {
            port: 0,
            reason: "the robot server needs a fixed port".to_string(),
        });
    }
    tokio::net::TcpListener::bind(address)
        .await
        .map(drop)
        .map_err(|e| Error::PortUnavailable {
            port: address.port(),
            reason: e.to_string(),
        })
}

/// Launch the host with `flags` and wait until its robot server answers
///
/// On any failure after spawning, the process is killed and reaped before
/// the error is returned.
pub async fn start_session(
    host: &HostConfig,
    flags: LaunchFlags,
    timeouts: &Timeouts,
) -> Result<HostSession> {
    let address = parse_endpoint(&format!("{}:{}", host.bind, flags.port))?;
    ensure_port_free(address).await?;

    let executable = resolve_executable(host)?;
    let mut cmd = Command::new(&executable);
    cmd.args(&host.args)
        .args(flags.to_args())
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|e| {
        Error::HostStartFailed(format!("Failed to start {}: {}", executable.display(), e))
    })?;
    tracing::info!(
        pid = child.id(),
        "Started host {} with robot server on {}",
        executable.display(),
        address
    );

    let channel = RobotClient::new(address, probe_timeout(timeouts))?;
    let mut session = HostSession {
        process: Some(child),
        address,
        state: HostState::Starting,
        channel: Arc::new(channel),
        shutdown_grace: Duration::from_millis(timeouts.shutdown_ms),
    };

    if let Err(e) = session.wait_ready(timeouts).await {
        if let Some(mut child) = session.process.take() {
            kill_process(&mut child).await;
        }
        session.state = HostState::Terminated;
        return Err(e);
    }

    session.transition(HostState::Ready)?;
    tracing::info!("Host ready at {}", address);
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NullChannel;

    #[async_trait]
    impl ControlChannel for NullChannel {
        async fn probe(&self) -> Result<()> {
            Ok(())
        }
        async fn send(&self, _command: &str, _arguments: Value, _timeout: Duration) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn session() -> HostSession {
        HostSession::attached("127.0.0.1:1".parse().unwrap(), Arc::new(NullChannel))
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut s = session();
        assert_eq!(s.state(), HostState::Ready);
        s.transition(HostState::Busy).unwrap();
        assert!(s.transition(HostState::Busy).is_err());
        s.transition(HostState::Ready).unwrap();
        assert!(s.transition(HostState::Terminated).is_err());
        s.transition(HostState::Terminating).unwrap();
        assert!(s.transition(HostState::Ready).is_err());
        s.transition(HostState::Terminated).unwrap();
        assert!(matches!(
            s.transition(HostState::Terminating),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn test_busy_can_be_cancelled() {
        let mut s = session();
        s.transition(HostState::Busy).unwrap();
        s.begin_termination();
        assert_eq!(s.state(), HostState::Terminating);
        s.begin_termination();
        assert_eq!(s.state(), HostState::Terminating);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut s = session();
        s.shutdown().await;
        assert_eq!(s.state(), HostState::Terminated);
        s.shutdown().await;
        assert_eq!(s.state(), HostState::Terminated);
        assert!(!s.check_alive().await);
    }

    #[tokio::test]
    async fn test_huge_launch_timeout_waits_without_deadline() {
        let mut s = session();
        let timeouts = Timeouts {
            launch_secs: u64::MAX,
            ..Timeouts::default()
        };
        s.wait_ready(&timeouts).await.unwrap();
    }

    #[test]
    fn test_missing_executable() {
        let host = HostConfig {
            executable: Some(PathBuf::from("definitely-not-an-ide-binary")),
            ..HostConfig::default()
        };
        assert!(matches!(
            resolve_executable(&host),
            Err(Error::HostStartFailed(_))
        ));
        assert!(matches!(
            resolve_executable(&HostConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn free_port() -> u16 {
            std::net::TcpListener::bind("127.0.0.1:0")
                .unwrap()
                .local_addr()
                .unwrap()
                .port()
        }

        fn sh(script: String) -> HostConfig {
            HostConfig {
                executable: Some(PathBuf::from("sh")),
                args: vec!["-c".to_string(), script],
                ..HostConfig::default()
            }
        }

        fn quick() -> Timeouts {
            Timeouts {
                launch_secs: 1,
                probe_interval_ms: 50,
                ..Timeouts::default()
            }
        }

        #[tokio::test]
        async fn test_launch_timeout_kills_host() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("pid");
            let host = sh(format!("echo $$ > '{}'; exec sleep 30", pid_file.display()));

            let err = start_session(&host, LaunchFlags::for_automation(free_port()), &quick())
                .await
                .err()
                .unwrap();
            assert!(matches!(err, Error::LaunchTimeout(1)));

            let pid: i32 = std::fs::read_to_string(&pid_file)
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            let alive = unsafe { libc::kill(pid, 0) } == 0;
            assert!(!alive, "host process {} leaked", pid);
        }

        #[tokio::test]
        async fn test_early_exit_is_reported() {
            let host = sh("exit 4".to_string());
            let err = start_session(&host, LaunchFlags::for_automation(free_port()), &quick())
                .await
                .err()
                .unwrap();
            assert!(matches!(err, Error::HostExited(Some(4))));
        }

        #[tokio::test]
        async fn test_port_in_use_prevents_launch() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("spawned");
            let busy = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = busy.local_addr().unwrap().port();

            let host = sh(format!("touch '{}'", marker.display()));
            let err = start_session(&host, LaunchFlags::for_automation(port), &quick())
                .await
                .err()
                .unwrap();
            assert!(matches!(err, Error::PortUnavailable { port: p, .. } if p == port));
            assert!(!marker.exists());
        }
    }
}
