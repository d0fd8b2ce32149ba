//! Running a peon as a task instead of a process.

use super::{Hardware, Peon, DEFAULT_BOARD_TIMEOUT};
use crate::broker::Connector;
use crate::worker::{ExitReport, Launcher, WorkerEnv, WorkerProcess};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Launches each worker as a tokio task running [`Peon::run`].
///
/// The peon connects through `connector` like any remote worker would,
/// so supervision and messaging behave exactly as with processes.
#[derive(Debug, Clone)]
pub struct InProcessLauncher {
    connector: Arc<dyn Connector>,
    hardware: Arc<dyn Hardware>,
    ready_timeout: Duration,
}

impl InProcessLauncher {
    pub fn new(connector: Arc<dyn Connector>, hardware: Arc<dyn Hardware>) -> Self {
        Self {
            connector,
            hardware,
            ready_timeout: DEFAULT_BOARD_TIMEOUT,
        }
    }

    /// Time each peon allows the hardware to open.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

#[async_trait]
impl Launcher for InProcessLauncher {
    async fn launch(&self, env: &WorkerEnv) -> io::Result<Box<dyn WorkerProcess>> {
        let env = env.clone();
        let connector = Arc::clone(&self.connector);
        let peon = Peon::new(Arc::clone(&self.hardware)).with_ready_timeout(self.ready_timeout);
        debug!(worker = %env.worker_id, "starting in-process peon");

        let handle = tokio::spawn(async move {
            peon.run(&env, connector.as_ref())
                .await
                .map_err(|e| e.to_string())
        });
        Ok(Box::new(PeonTask { handle, exit: None }))
    }
}

#[derive(Debug)]
struct PeonTask {
    handle: JoinHandle<Result<(), String>>,
    exit: Option<ExitReport>,
}

#[async_trait]
impl WorkerProcess for PeonTask {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> ExitReport {
        if let Some(exit) = &self.exit {
            return exit.clone();
        }
        let report = match (&mut self.handle).await {
            Ok(Ok(())) => ExitReport {
                code: Some(0),
                detail: None,
            },
            Ok(Err(e)) => ExitReport {
                code: Some(1),
                detail: Some(e),
            },
            Err(e) if e.is_cancelled() => ExitReport {
                code: None,
                detail: Some("killed".into()),
            },
            Err(e) => ExitReport {
                code: None,
                detail: Some(format!("peon task failed: {e}")),
            },
        };
        self.exit = Some(report.clone());
        report
    }

    async fn kill(&mut self) {
        if self.exit.is_some() {
            return;
        }
        self.handle.abort();
        // Resolves once the task has been dropped, closing its session.
        let _ = (&mut self.handle).await;
        self.exit = Some(ExitReport {
            code: None,
            detail: Some("killed".into()),
        });
    }
}

impl Drop for PeonTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use crate::peon::SimHardware;

    fn env(id: &str) -> WorkerEnv {
        WorkerEnv {
            broker_host: "local".into(),
            broker_port: 0,
            worker_id: id.into(),
            namespace: "digs".into(),
            project: "home".into(),
        }
    }

    #[tokio::test]
    async fn peon_connects_under_its_own_id() {
        let broker = LocalBroker::new();
        let mut tap = broker.tap();
        let launcher = InProcessLauncher::new(Arc::new(broker.clone()), Arc::new(SimHardware::new()));

        let mut task = launcher.launch(&env("uno-1")).await.unwrap();
        let online = tap.recv().await.unwrap();
        assert_eq!(online.topic, "digs/home/uno-1-peon/online");

        task.kill().await;
        assert_eq!(task.wait().await.detail.as_deref(), Some("killed"));
    }

    #[tokio::test]
    async fn unreachable_broker_ends_the_task() {
        let broker = LocalBroker::new();
        broker.shutdown();
        let launcher = InProcessLauncher::new(Arc::new(broker), Arc::new(SimHardware::new()));

        let mut task = launcher.launch(&env("uno-1")).await.unwrap();
        assert_eq!(task.wait().await.code, Some(1));
    }
}
