//! The central process.
//!
//! [`DigsApp`] wires a broker, a launcher and the [`BoardRegistry`]
//! together from a resolved [`DigsConfig`].
//!
//! | `broker.embedded` | Connector |
//! |-------------------|-----------|
//! | `true` | [`TcpBroker`] bound to `broker.host:broker.port`, served in-process |
//! | `false` | [`TcpConnector`] to an external broker |
//!
//! | `worker.mode` | Launcher |
//! |---------------|----------|
//! | `process` | [`ProcessLauncher`]: `worker.program` or `<current exe> peon` |
//! | `in_process` | [`InProcessLauncher`] over [`SimHardware`] |

use crate::registry::{BoardRegistry, StartReport};
use crate::AppError;
use digs_runtime::{
    BoardContext, Connector, DigsConfig, InProcessLauncher, Launcher, ProcessLauncher,
    SimHardware, TcpBroker, TcpConnector, WorkerMode, WorkerSettings,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for [`DigsApp`].
///
/// # Example
///
/// ```no_run
/// use digs_app::DigsApp;
/// use digs_runtime::DigsConfig;
///
/// # async fn run() -> Result<(), digs_app::AppError> {
/// let app = DigsApp::builder(DigsConfig::default()).build().await?;
/// app.run().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DigsAppBuilder {
    config: DigsConfig,
    connector: Option<Arc<dyn Connector>>,
    launcher: Option<Arc<dyn Launcher>>,
}

impl DigsAppBuilder {
    #[must_use]
    pub fn new(config: DigsConfig) -> Self {
        Self {
            config,
            connector: None,
            launcher: None,
        }
    }

    /// Uses `connector` instead of the configured broker.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Uses `launcher` instead of the configured worker mode.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Binds the broker if needed and registers every configured board.
    ///
    /// Boards are not started.
    ///
    /// # Errors
    ///
    /// - [`AppError::Broker`] if the embedded broker cannot bind.
    /// - [`AppError::Io`] if the worker executable cannot be resolved.
    /// - [`AppError::Collision`] if two boards share an id.
    pub async fn build(self) -> Result<DigsApp, AppError> {
        let mut config = self.config;
        let mut broker = None;

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None if config.broker.embedded => {
                let server = TcpBroker::bind(&config.broker.address()).await?;
                let addr = server.local_addr()?;
                config.broker.port = addr.port();
                info!(%addr, "embedded broker bound");

                let (stop_tx, stop_rx) = oneshot::channel::<()>();
                let handle = tokio::spawn(server.serve(async move {
                    let _ = stop_rx.await;
                }));
                broker = Some(EmbeddedBroker { stop_tx, handle });
                Arc::new(TcpConnector::new(addr.to_string()))
            }
            None => Arc::new(TcpConnector::new(config.broker.address())),
        };

        let launcher = match self.launcher {
            Some(launcher) => launcher,
            None => launcher_for(&config, &connector)?,
        };

        let context = BoardContext {
            connector,
            launcher,
            settings: WorkerSettings::from_config(&config),
        };
        let registry = BoardRegistry::from_config(&config, context)?;
        debug!(boards = registry.len(), "registry built");

        Ok(DigsApp {
            config,
            registry,
            broker,
        })
    }
}

fn launcher_for(
    config: &DigsConfig,
    connector: &Arc<dyn Connector>,
) -> Result<Arc<dyn Launcher>, AppError> {
    let launcher: Arc<dyn Launcher> = match config.worker.mode {
        WorkerMode::InProcess => Arc::new(
            InProcessLauncher::new(Arc::clone(connector), Arc::new(SimHardware::new()))
                .with_ready_timeout(config.worker.ready_timeout()),
        ),
        WorkerMode::Process => {
            let launcher = match &config.worker.program {
                Some(program) => ProcessLauncher::new(program).with_args(config.worker.args.clone()),
                None => ProcessLauncher::current_exe()?,
            };
            Arc::new(launcher)
        }
    };
    Ok(launcher)
}

#[derive(Debug)]
struct EmbeddedBroker {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// A configured set of boards plus the broker they talk through.
#[derive(Debug)]
pub struct DigsApp {
    config: DigsConfig,
    registry: BoardRegistry,
    broker: Option<EmbeddedBroker>,
}

impl DigsApp {
    #[must_use]
    pub fn builder(config: DigsConfig) -> DigsAppBuilder {
        DigsAppBuilder::new(config)
    }

    /// Effective configuration. With an embedded broker, `broker.port`
    /// is the bound port.
    #[must_use]
    pub fn config(&self) -> &DigsConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &BoardRegistry {
        &self.registry
    }

    /// Starts every board. Failures are reported, not fatal.
    pub async fn start(&self) -> StartReport {
        if self.registry.is_empty() {
            warn!("no boards configured");
        }
        self.registry.start_all().await
    }

    /// Starts, waits for `shutdown`, then stops everything.
    ///
    /// `shutdown` is honoured during start-up too: boards still starting
    /// are cancelled instead of waited out.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        {
            let start = self.start();
            tokio::pin!(start);
            tokio::select! {
                biased;
                report = &mut start => {
                    info!(
                        ready = ?report.started,
                        failed = report.failed.len(),
                        "digs running"
                    );
                    (&mut shutdown).await;
                }
                () = &mut shutdown => {
                    info!("shutdown requested during start-up");
                    let ((), report) = tokio::join!(self.registry.stop_all(), start);
                    debug!(cancelled = report.failed.len(), "start-up abandoned");
                }
            }
        }
        self.shutdown().await;
    }

    /// Like [`run_until`](Self::run_until), stopping on Ctrl-C.
    pub async fn run(self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await;
    }

    /// Stops every board and the embedded broker.
    pub async fn shutdown(self) {
        self.registry.stop_all().await;
        if let Some(broker) = self.broker {
            let _ = broker.stop_tx.send(());
            if let Err(e) = broker.handle.await {
                warn!(error = %e, "broker task failed");
            }
        }
        info!("digs stopped");
    }
}
