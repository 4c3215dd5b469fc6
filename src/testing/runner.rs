//! Scenario runner
//!
//! Runs scenarios strictly in order against one [`HostSession`] while their
//! setup proceeds concurrently, and scopes a whole verification run so the
//! host is always shut down.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use indicatif::ProgressBar;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::common::config::{Config, Timeouts};
use crate::common::{Error, Result};
use crate::host::{start_session, HostSession, HostState, LaunchFlags};

use super::container::{Container, Dependencies};
use super::report::{ErrorCause, Outcome, RunReport, ScenarioResult};
use super::scenario::{Scenario, ScenarioContext};

/// Limits applied while running scenarios
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Per-command response timeout
    pub command_timeout: Duration,
    /// Whole-run limit; reaching it acts like cancellation
    pub run_timeout: Option<Duration>,
}

impl RunOptions {
    pub fn from_timeouts(timeouts: &Timeouts) -> Self {
        Self {
            command_timeout: Duration::from_secs(timeouts.command_secs),
            run_timeout: (timeouts.run_secs > 0).then(|| Duration::from_secs(timeouts.run_secs)),
        }
    }
}

/// Cloneable cancellation signal for a run
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut rx = self.sender.subscribe();
        // The sender lives as long as self, so this only ends on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Resolves when the run is cancelled or its deadline passes
async fn interrupted(cancel: &CancelToken, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
        None => cancel.cancelled().await,
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

type SetupTask = JoinHandle<Result<Dependencies>>;

fn spawn_setup(scenario: &Arc<dyn Scenario>, container: &Arc<Container>) -> SetupTask {
    let scenario = Arc::clone(scenario);
    let container = Arc::clone(container);
    tokio::spawn(async move {
        let deps = container.resolve(&scenario.requires())?;
        scenario.prepare(&deps).await?;
        Ok(deps)
    })
}

/// Run `scenarios` in order against `session`
///
/// Always returns exactly one result per scenario, in declaration order.
/// Setup for every scenario starts immediately; bodies run one at a time,
/// each holding the session `Busy`. Once the session is terminated or the
/// run is cancelled, remaining scenarios are recorded as
/// `Errored(SessionTerminated)` without running.
pub async fn run_scenarios(
    session: &mut HostSession,
    scenarios: &[Arc<dyn Scenario>],
    container: Arc<Container>,
    options: &RunOptions,
    cancel: &CancelToken,
) -> Vec<ScenarioResult> {
    let deadline = options
        .run_timeout
        .and_then(|t| Instant::now().checked_add(t));
    let mut setups: Vec<Option<SetupTask>> = scenarios
        .iter()
        .map(|s| Some(spawn_setup(s, &container)))
        .collect();
    let mut results = Vec::with_capacity(scenarios.len());

    for (index, scenario) in scenarios.iter().enumerate() {
        let id = scenario.id().to_string();
        let setup = setups[index].take();

        if session.state() == HostState::Ready && (cancel.is_cancelled() || past(deadline)) {
            tracing::warn!("Run interrupted before '{}', terminating session", id);
            session.begin_termination();
        }
        if session.state() != HostState::Ready {
            if let Some(task) = setup {
                task.abort();
            }
            results.push(ScenarioResult::new(
                id,
                Outcome::errored(ErrorCause::SessionTerminated),
                Duration::ZERO,
            ));
            continue;
        }

        let started = Instant::now();
        tracing::info!("Scenario '{}' ({}/{})", id, index + 1, scenarios.len());
        let outcome = run_one(session, scenario.as_ref(), setup, options, cancel, deadline).await;
        tracing::info!("Scenario '{}': {:?}", id, outcome);
        results.push(ScenarioResult::new(id, outcome, started.elapsed()));
    }

    for task in setups.into_iter().flatten() {
        task.abort();
    }
    results
}

/// One scenario's turn: wait for its setup, then run its body with the
/// session held `Busy`
async fn run_one(
    session: &mut HostSession,
    scenario: &dyn Scenario,
    setup: Option<SetupTask>,
    options: &RunOptions,
    cancel: &CancelToken,
    deadline: Option<Instant>,
) -> Outcome {
    let Some(mut task) = setup else {
        return Outcome::errored(ErrorCause::Setup("setup task missing".to_string()));
    };

    let joined = tokio::select! {
        biased;
        joined = &mut task => joined,
        _ = interrupted(cancel, deadline) => {
            task.abort();
            session.begin_termination();
            return Outcome::errored(ErrorCause::Cancelled);
        }
    };
    let deps = match joined {
        Ok(Ok(deps)) => deps,
        Ok(Err(e)) => return Outcome::errored(ErrorCause::from_setup(&e)),
        Err(e) if e.is_panic() => {
            return Outcome::errored(ErrorCause::Panicked(panic_message(&*e.into_panic())))
        }
        Err(e) => return Outcome::errored(ErrorCause::Setup(e.to_string())),
    };

    if let Err(e) = session.transition(HostState::Busy) {
        return Outcome::errored(ErrorCause::Protocol(e.to_string()));
    }

    let ctx = ScenarioContext::new(session.channel(), deps, options.command_timeout);
    let body = AssertUnwindSafe(scenario.run(&ctx)).catch_unwind();
    let finished = tokio::select! {
        biased;
        finished = body => Some(finished),
        _ = interrupted(cancel, deadline) => None,
    };

    let outcome = match finished {
        None => {
            session.begin_termination();
            return Outcome::errored(ErrorCause::Cancelled);
        }
        Some(Ok(Ok(()))) => Outcome::Passed,
        Some(Ok(Err(e))) => Outcome::from_body_error(&e),
        Some(Err(payload)) => Outcome::errored(ErrorCause::Panicked(panic_message(&*payload))),
    };

    if session.transition(HostState::Ready).is_err() {
        return outcome;
    }
    if outcome.is_errored() && !session.check_alive().await {
        tracing::warn!("Host is gone after '{}'", scenario.id());
    }
    outcome
}

/// Where the session for a verification run comes from
#[derive(Debug, Clone)]
pub enum SessionTarget {
    /// Launch the configured host with these flags
    Launch(LaunchFlags),
    /// Use a host already listening at this address
    Attach(SocketAddr),
}

/// Everything a verification run needs besides configuration
pub struct VerifyPlan {
    pub target: SessionTarget,
    pub scenarios: Vec<Arc<dyn Scenario>>,
    pub container: Container,
    pub cancel: CancelToken,
}

/// Start or attach a session, run every scenario, and shut the session down
///
/// Launch failures return `Err` without running anything. Once a session
/// exists it is shut down on every path before this returns.
pub async fn verify(config: &Config, plan: VerifyPlan) -> Result<RunReport> {
    let VerifyPlan {
        target,
        scenarios,
        container,
        cancel,
    } = plan;

    let started = Instant::now();
    let acquire = async {
        match target {
            SessionTarget::Launch(flags) => start_session(&config.host, flags, &config.timeouts).await,
            SessionTarget::Attach(address) => HostSession::attach(address, &config.timeouts).await,
        }
    };
    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Waiting for the host to become ready...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    // Dropping a half-started session kills its process
    let acquired = tokio::select! {
        session = acquire => session,
        _ = cancel.cancelled() => Err(Error::Cancelled),
    };
    spinner.finish_and_clear();
    let mut session = acquired?;
    tracing::info!(
        "Host ready at {}, running {} scenario(s)",
        session.address(),
        scenarios.len()
    );

    let options = RunOptions::from_timeouts(&config.timeouts);
    let results = AssertUnwindSafe(run_scenarios(
        &mut session,
        &scenarios,
        Arc::new(container),
        &options,
        &cancel,
    ))
    .catch_unwind()
    .await;

    session.shutdown().await;

    match results {
        Ok(results) => Ok(RunReport::new(results, started.elapsed())),
        Err(payload) => Err(Error::Internal(format!(
            "scenario runner panicked: {}",
            panic_message(&*payload)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ControlChannel;
    use crate::testing::ScriptedScenario;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Control channel whose liveness tests can flip
    struct FakeChannel {
        alive: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl FakeChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                alive: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ControlChannel for FakeChannel {
        async fn probe(&self) -> Result<()> {
            if self.alive.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::Protocol("connection refused".into()))
            }
        }

        async fn send(&self, command: &str, _arguments: Value, _timeout: Duration) -> Result<Value> {
            if !self.alive.load(Ordering::SeqCst) {
                return Err(Error::Protocol("connection refused".into()));
            }
            self.sent.lock().unwrap().push(command.to_string());
            Ok(json!("ok"))
        }
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Pass,
        Assert,
        ProtocolError,
        KillHost,
        CancelRun,
        Hang,
        Panic,
    }

    struct TestScenario {
        id: String,
        behavior: Behavior,
        requires: Vec<String>,
        channel: Arc<FakeChannel>,
        cancel: CancelToken,
        ran: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Scenario for TestScenario {
        fn id(&self) -> &str {
            &self.id
        }

        fn requires(&self) -> Vec<String> {
            self.requires.clone()
        }

        async fn run(&self, ctx: &ScenarioContext) -> Result<()> {
            self.ran.fetch_add(1, Ordering::SeqCst);
            for capability in &self.requires {
                ctx.dependency::<String>(capability)?;
            }
            ctx.send(&self.id, json!({})).await?;
            match self.behavior {
                Behavior::Pass => Ok(()),
                Behavior::Assert => Err(Error::TestAssertion("label mismatch".into())),
                Behavior::ProtocolError => Err(Error::Protocol("connection reset".into())),
                Behavior::KillHost => {
                    self.channel.alive.store(false, Ordering::SeqCst);
                    Err(Error::Protocol("connection reset".into()))
                }
                Behavior::CancelRun => {
                    self.cancel.cancel();
                    Ok(())
                }
                Behavior::Hang => {
                    self.cancel.cancel();
                    std::future::pending::<()>().await;
                    Ok(())
                }
                Behavior::Panic => panic!("scenario blew up"),
            }
        }
    }

    struct Harness {
        channel: Arc<FakeChannel>,
        cancel: CancelToken,
        ran: Arc<AtomicUsize>,
        scenarios: Vec<Arc<dyn Scenario>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                channel: FakeChannel::new(),
                cancel: CancelToken::new(),
                ran: Arc::new(AtomicUsize::new(0)),
                scenarios: Vec::new(),
            }
        }

        fn add(mut self, behavior: Behavior) -> Self {
            self.add_requiring(behavior, &[]);
            self
        }

        fn add_requiring(&mut self, behavior: Behavior, requires: &[&str]) {
            let id = format!("s{}", self.scenarios.len() + 1);
            self.scenarios.push(Arc::new(TestScenario {
                id,
                behavior,
                requires: requires.iter().map(|s| s.to_string()).collect(),
                channel: Arc::clone(&self.channel),
                cancel: self.cancel.clone(),
                ran: Arc::clone(&self.ran),
            }));
        }

        async fn run(&self, container: Container) -> (HostSession, Vec<ScenarioResult>) {
            let mut session =
                HostSession::attached("127.0.0.1:8082".parse().unwrap(), self.channel.clone());
            let options = RunOptions {
                command_timeout: Duration::from_secs(1),
                run_timeout: None,
            };
            let results = run_scenarios(
                &mut session,
                &self.scenarios,
                Arc::new(container),
                &options,
                &self.cancel,
            )
            .await;
            (session, results)
        }
    }

    fn outcomes(results: &[ScenarioResult]) -> Vec<Outcome> {
        results.iter().map(|r| r.outcome.clone()).collect()
    }

    fn terminated() -> Outcome {
        Outcome::errored(ErrorCause::SessionTerminated)
    }

    #[tokio::test]
    async fn test_protocol_error_does_not_abort_run() {
        let harness = Harness::new()
            .add(Behavior::Pass)
            .add(Behavior::ProtocolError)
            .add(Behavior::Assert)
            .add(Behavior::Pass);
        let (session, results) = harness.run(Container::new()).await;

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["s1", "s2", "s3", "s4"]);
        assert_eq!(results[0].outcome, Outcome::Passed);
        assert!(matches!(
            results[1].outcome,
            Outcome::Errored {
                cause: ErrorCause::Protocol(_)
            }
        ));
        assert!(matches!(results[2].outcome, Outcome::Failed { .. }));
        assert_eq!(results[3].outcome, Outcome::Passed);
        assert_eq!(session.state(), HostState::Ready);
        assert_eq!(*harness.channel.sent.lock().unwrap(), ["s1", "s2", "s3", "s4"]);
    }

    #[tokio::test]
    async fn test_dead_host_marks_rest_terminated() {
        let harness = Harness::new()
            .add(Behavior::Pass)
            .add(Behavior::KillHost)
            .add(Behavior::Pass)
            .add(Behavior::Pass);
        let (session, results) = harness.run(Container::new()).await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].outcome, Outcome::Passed);
        assert!(results[1].outcome.is_errored());
        assert_eq!(outcomes(&results[2..]), [terminated(), terminated()]);
        assert_eq!(harness.ran.load(Ordering::SeqCst), 2);
        assert_eq!(session.state(), HostState::Terminated);
    }

    #[tokio::test]
    async fn test_cancel_between_scenarios() {
        let harness = Harness::new()
            .add(Behavior::Pass)
            .add(Behavior::CancelRun)
            .add(Behavior::Pass)
            .add(Behavior::Pass)
            .add(Behavior::Pass);
        let (session, results) = harness.run(Container::new()).await;

        assert_eq!(
            outcomes(&results),
            [
                Outcome::Passed,
                Outcome::Passed,
                terminated(),
                terminated(),
                terminated()
            ]
        );
        assert_eq!(harness.ran.load(Ordering::SeqCst), 2);
        assert_eq!(session.state(), HostState::Terminating);
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let harness = Harness::new()
            .add(Behavior::Pass)
            .add(Behavior::Hang)
            .add(Behavior::Pass);
        let (_, results) = harness.run(Container::new()).await;

        assert_eq!(
            outcomes(&results),
            [
                Outcome::Passed,
                Outcome::errored(ErrorCause::Cancelled),
                terminated()
            ]
        );
    }

    #[tokio::test]
    async fn test_run_timeout_acts_as_cancel() {
        let harness = Harness::new();
        // The scenario cancels a token nobody watches, so only the deadline fires
        let scenario: Arc<dyn Scenario> = Arc::new(TestScenario {
            id: "slow".into(),
            behavior: Behavior::Hang,
            requires: Vec::new(),
            channel: Arc::clone(&harness.channel),
            cancel: CancelToken::new(),
            ran: Arc::clone(&harness.ran),
        });
        let mut session =
            HostSession::attached("127.0.0.1:8082".parse().unwrap(), harness.channel.clone());
        let options = RunOptions {
            command_timeout: Duration::from_secs(1),
            run_timeout: Some(Duration::from_millis(50)),
        };
        let results = run_scenarios(
            &mut session,
            &[scenario],
            Arc::new(Container::new()),
            &options,
            &CancelToken::new(),
        )
        .await;
        assert_eq!(outcomes(&results), [Outcome::errored(ErrorCause::Cancelled)]);
        assert_eq!(session.state(), HostState::Terminating);
    }

    #[tokio::test]
    async fn test_huge_run_timeout_means_no_deadline() {
        let harness = Harness::new().add(Behavior::Pass).add(Behavior::Pass);
        let mut session =
            HostSession::attached("127.0.0.1:8082".parse().unwrap(), harness.channel.clone());
        let options = RunOptions {
            command_timeout: Duration::from_secs(1),
            run_timeout: Some(Duration::MAX),
        };
        let results = run_scenarios(
            &mut session,
            &harness.scenarios,
            Arc::new(Container::new()),
            &options,
            &harness.cancel,
        )
        .await;
        assert_eq!(outcomes(&results), [Outcome::Passed, Outcome::Passed]);
    }

    #[tokio::test]
    async fn test_unresolved_dependency_only_affects_its_scenario() {
        let mut harness = Harness::new();
        harness.add_requiring(Behavior::Pass, &["project_dir"]);
        harness.add_requiring(Behavior::Pass, &["database"]);
        harness.add_requiring(Behavior::Pass, &[]);
        let container = Container::new().instance("project_dir", "/tmp/p".to_string());
        let (_, results) = harness.run(container).await;

        assert_eq!(results[0].outcome, Outcome::Passed);
        match &results[1].outcome {
            Outcome::Errored {
                cause: ErrorCause::Dependency(msg),
            } => assert!(msg.contains("database")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(results[2].outcome, Outcome::Passed);
        assert_eq!(harness.ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_is_recorded() {
        let harness = Harness::new().add(Behavior::Panic).add(Behavior::Pass);
        let (session, results) = harness.run(Container::new()).await;

        match &results[0].outcome {
            Outcome::Errored {
                cause: ErrorCause::Panicked(msg),
            } => assert!(msg.contains("blew up")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(results[1].outcome, Outcome::Passed);
        assert_eq!(session.state(), HostState::Ready);
    }

    /// Kills the host once another scenario's setup shell has written its pid
    struct KillHostAfterSetupStarts {
        pid_file: std::path::PathBuf,
        channel: Arc<FakeChannel>,
    }

    #[async_trait]
    impl Scenario for KillHostAfterSetupStarts {
        fn id(&self) -> &str {
            "kill-host"
        }

        async fn run(&self, _ctx: &ScenarioContext) -> Result<()> {
            read_pid(&self.pid_file).await;
            self.channel.alive.store(false, Ordering::SeqCst);
            Err(Error::Protocol("connection reset".into()))
        }
    }

    async fn read_pid(path: &std::path::Path) -> i32 {
        for _ in 0..500 {
            if let Some(pid) = std::fs::read_to_string(path)
                .ok()
                .and_then(|s| s.trim().parse().ok())
            {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("setup never wrote {}", path.display());
    }

    #[cfg(target_os = "linux")]
    fn process_running(pid: i32) -> bool {
        std::fs::read_to_string(format!("/proc/{}/stat", pid))
            .ok()
            .and_then(|stat| {
                stat.rsplit_once(") ")
                    .map(|(_, rest)| !rest.starts_with(['Z', 'X']))
            })
            .unwrap_or(false)
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_aborted_setup_kills_its_shell() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("setup.pid");
        let channel = FakeChannel::new();

        let setup = ScriptedScenario::from_yaml(&format!(
            "name: slow-fixture\nsetup:\n  - shell: \"echo $$ > '{}'; exec sleep 30\"\nsteps: []\n",
            pid_file.display()
        ))
        .unwrap();
        let scenarios: Vec<Arc<dyn Scenario>> = vec![
            Arc::new(KillHostAfterSetupStarts {
                pid_file: pid_file.clone(),
                channel: Arc::clone(&channel),
            }),
            Arc::new(setup),
        ];

        let mut session = HostSession::attached("127.0.0.1:8082".parse().unwrap(), channel.clone());
        let options = RunOptions {
            command_timeout: Duration::from_secs(1),
            run_timeout: None,
        };
        let results = run_scenarios(
            &mut session,
            &scenarios,
            Arc::new(Container::new()),
            &options,
            &CancelToken::new(),
        )
        .await;
        assert_eq!(outcomes(&results[1..]), [terminated()]);

        let pid = read_pid(&pid_file).await;
        let mut running = true;
        for _ in 0..500 {
            running = process_running(pid);
            if !running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!running, "setup shell {} outlived the run", pid);
    }

    #[tokio::test]
    async fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
        // Already cancelled resolves immediately
        token.cancelled().await;
    }

    #[test]
    fn test_run_options_from_timeouts() {
        let mut timeouts = Timeouts::default();
        timeouts.run_secs = 0;
        let options = RunOptions::from_timeouts(&timeouts);
        assert_eq!(options.command_timeout, Duration::from_secs(timeouts.command_secs));
        assert!(options.run_timeout.is_none());
    }
}
