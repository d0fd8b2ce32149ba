//! digs CLI - board workers over a publish/subscribe channel
//!
//! # Commands
//!
//! - `digs run` (default): start the configured boards and wait for Ctrl-C
//! - `digs broker`: run a standalone TCP broker
//! - `digs peon`: worker entry point, configured by `DIGS_*` variables
//! - `digs config`: print the resolved configuration as TOML
//!
//! # Configuration
//!
//! Configuration is loaded from multiple sources with priority:
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`DIGS_*`)
//! 3. Project config (`.digs/config.toml` in the project root)
//! 4. Global config (`~/.digs/config.toml`)
//! 5. Default values (lowest priority)

mod tracing_writer;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use digs_app::{
    ConfigError, ConfigLoader, DigsApp, DigsConfig, Peon, SimHardware, TcpBroker, TcpConnector,
    WorkerEnv, WorkerMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// digs - board workers over a publish/subscribe channel
#[derive(Parser, Debug)]
#[command(name = "digs")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root directory (defaults to current directory)
    #[arg(short = 'C', long, global = true)]
    project: Option<PathBuf>,

    /// Global config file (defaults to ~/.digs/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Start every configured board and wait for Ctrl-C
    Run {
        /// Run workers as in-process tasks over simulated hardware
        #[arg(long)]
        in_process: bool,
    },
    /// Run a standalone TCP broker
    Broker {
        /// Listen address (defaults to broker.host:broker.port)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Run a worker. Reads DIGS_MQTT_HOST, DIGS_MQTT_PORT, DIGS_ID,
    /// DIGS_NAMESPACE and DIGS_PROJECT.
    Peon,
    /// Print the resolved configuration
    Config,
}

/// CLI-based configuration resolver.
///
/// Merges file/env config via [`ConfigLoader`] and applies CLI argument
/// overrides as the highest-priority layer.
struct CliConfigResolver {
    project_root: PathBuf,
    global_config: Option<PathBuf>,
    log_file: Option<PathBuf>,
    in_process: bool,
}

impl CliConfigResolver {
    fn from_args(args: &Args) -> Self {
        let project_root = args.project.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|e| {
                eprintln!("Warning: cannot read current directory ({e}), using '.'");
                PathBuf::from(".")
            })
        });

        Self {
            project_root,
            global_config: args.config.clone(),
            log_file: args.log_file.clone(),
            in_process: matches!(args.command, Some(Command::Run { in_process: true })),
        }
    }

    fn resolve(&self) -> Result<DigsConfig, ConfigError> {
        let mut loader = ConfigLoader::new().with_project_root(&self.project_root);
        if let Some(path) = &self.global_config {
            loader = loader.with_global_config(path);
        }
        let mut config = loader.load()?;

        if let Some(path) = &self.log_file {
            config.logging.file = Some(path.clone());
        }
        if self.in_process {
            config.worker.mode = WorkerMode::InProcess;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.clone().unwrap_or(Command::Run { in_process: false });

    let resolver = CliConfigResolver::from_args(&args);
    let config = resolver
        .resolve()
        .map_err(|e| anyhow::anyhow!("Config error: {e}"))?;

    if command == Command::Config {
        print!("{}", config.to_toml().context("cannot serialize config")?);
        return Ok(());
    }

    init_tracing(&args, &config);
    info!(path = %resolver.project_root.display(), "Project root");

    match command {
        Command::Run { .. } => {
            let app = DigsApp::builder(config).build().await?;
            info!(
                boards = app.registry().len(),
                broker = %app.config().broker.address(),
                mode = ?app.config().worker.mode,
                "digs v{}",
                env!("CARGO_PKG_VERSION")
            );
            app.run().await;
        }
        Command::Broker { bind } => {
            let addr = bind.unwrap_or_else(|| config.broker.address());
            let broker = TcpBroker::bind(&addr).await?;
            broker
                .serve(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;
        }
        Command::Peon => {
            let env = WorkerEnv::from_env().context("worker environment incomplete")?;
            let connector = TcpConnector::new(env.broker_address());
            Peon::new(Arc::new(SimHardware::new()))
                .run(&env, &connector)
                .await
                .with_context(|| format!("peon for '{}' failed", env.worker_id))?;
        }
        Command::Config => {}
    }

    Ok(())
}

/// Terminal filter: --debug > --verbose > `RUST_LOG` > `logging.level`.
/// The file layer, when configured, records everything at debug.
fn init_tracing(args: &Args, config: &DigsConfig) {
    let terminal_filter = if args.debug {
        EnvFilter::new("debug,tokio=warn")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    let terminal_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_writer = config.logging.file.as_ref().and_then(|path| {
        tracing_writer::FileMakeWriter::open(path)
            .map_err(|e| eprintln!("Warning: cannot open log file {}: {e}", path.display()))
            .ok()
    });

    if let Some(writer) = file_writer {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer);
        tracing_subscriber::registry()
            .with(terminal_layer.with_filter(terminal_filter))
            .with(file_layer.with_filter(EnvFilter::new("debug,tokio=warn")))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(terminal_layer.with_filter(terminal_filter))
            .init();
    }
}
