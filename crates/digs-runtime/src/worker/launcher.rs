//! Starting worker processes.
//!
//! The supervisor only needs something it can wait on and kill.
//! [`ProcessLauncher`] spawns an OS process; the peon module provides a
//! launcher that runs the worker as a task in the same runtime.

use super::WorkerEnv;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// How a worker ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, if the worker exited normally.
    pub code: Option<i32>,
    pub detail: Option<String>,
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, &self.detail) {
            (Some(code), Some(detail)) => write!(f, "exited with code {code} ({detail})"),
            (Some(code), None) => write!(f, "exited with code {code}"),
            (None, Some(detail)) => write!(f, "exited ({detail})"),
            (None, None) => write!(f, "exited"),
        }
    }
}

/// A running worker.
#[async_trait]
pub trait WorkerProcess: Send + fmt::Debug {
    /// OS process id, when there is one.
    fn id(&self) -> Option<u32>;

    /// Resolves when the worker ends. Cancel-safe, and returns the same
    /// report when called again after exit.
    async fn wait(&mut self) -> ExitReport;

    /// Ends the worker. No-op if it already exited.
    async fn kill(&mut self);
}

/// Starts workers.
#[async_trait]
pub trait Launcher: Send + Sync + fmt::Debug {
    /// Starts a worker with `env` as its bootstrap environment.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the worker could not be started.
    async fn launch(&self, env: &WorkerEnv) -> io::Result<Box<dyn WorkerProcess>>;
}

/// Launches workers as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Re-runs the current executable as `<exe> peon`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the executable path cannot be resolved.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).with_args(["peon"]))
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, env: &WorkerEnv) -> io::Result<Box<dyn WorkerProcess>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(env.vars())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        debug!(
            worker = %env.worker_id,
            program = %self.program.display(),
            pid = ?child.id(),
            "worker process spawned"
        );
        Ok(Box::new(ChildProcess { child, exit: None }))
    }
}

#[derive(Debug)]
struct ChildProcess {
    child: Child,
    exit: Option<ExitReport>,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> ExitReport {
        if let Some(exit) = &self.exit {
            return exit.clone();
        }
        let report = match self.child.wait().await {
            Ok(status) => ExitReport {
                code: status.code(),
                detail: (!status.success()).then(|| status.to_string()),
            },
            Err(e) => ExitReport {
                code: None,
                detail: Some(format!("wait failed: {e}")),
            },
        };
        self.exit = Some(report.clone());
        report
    }

    async fn kill(&mut self) {
        if self.exit.is_some() {
            return;
        }
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "worker kill failed");
        }
        self.exit = Some(ExitReport {
            code: None,
            detail: Some("killed".into()),
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn env() -> WorkerEnv {
        WorkerEnv {
            broker_host: "127.0.0.1".into(),
            broker_port: 1883,
            worker_id: "uno-1".into(),
            namespace: "digs".into(),
            project: "home".into(),
        }
    }

    #[tokio::test]
    async fn child_sees_bootstrap_env() {
        let launcher = ProcessLauncher::new("sh").with_args([
            "-c",
            r#"test "$DIGS_ID" = uno-1 && test "$DIGS_MQTT_PORT" = 1883 && exit 7"#,
        ]);
        let mut process = launcher.launch(&env()).await.unwrap();
        let report = process.wait().await;
        assert_eq!(report.code, Some(7));
        assert_eq!(process.wait().await, report);
    }

    #[tokio::test]
    async fn kill_ends_a_running_child() {
        let launcher = ProcessLauncher::new("sh").with_args(["-c", "sleep 30"]);
        let mut process = launcher.launch(&env()).await.unwrap();
        assert!(process.id().is_some());
        process.kill().await;
        assert_eq!(process.wait().await.detail.as_deref(), Some("killed"));
    }

    #[tokio::test]
    async fn missing_program_fails_to_launch() {
        let launcher = ProcessLauncher::new("/nonexistent/digs-worker");
        assert!(launcher.launch(&env()).await.is_err());
    }
}
