//! Worker supervision.
//!
//! A [`WorkerSupervisor`] owns one worker at a time: the process that
//! drives a board's hardware, and the [`ChannelClient`] the central
//! side uses to talk to it.
//!
//! # Start sequence
//!
//! ```text
//! Forking(n)       connect client "{board}-{k}", subscribe "{board}-{k}-peon/#",
//!                  launch worker with DIGS_* env
//! OnlineWait(n)    ── ready_timeout armed ──┐
//!                  wait for peon "online"   │
//! Initializing(n)  request init {options}   │
//!                  reply {id, port?}  ──────┘ cancelled
//! Ready            spawn monitor
//! ```
//!
//! Any failure on the way (launch error, timeout, worker exit, lost
//! broker session, `{error}` reply, reply without `id`) kills the worker,
//! drops the client and enters `Failed(n)`. After `max_retries`
//! failures the supervisor is `Terminated` and `start` returns
//! [`WorkerError::Fork`] if the last attempt could not launch, otherwise
//! [`WorkerError::NotReady`].
//!
//! Only one start runs at a time. A caller that arrives while a start is
//! in flight waits for it and shares its outcome.
//!
//! [`stop`](WorkerSupervisor::stop) cancels a start in flight: the
//! current attempt's worker is killed, no retry follows, and `start`
//! returns [`WorkerError::Stopped`].

mod env;
mod error;
mod launcher;
mod state;

pub use env::{peon_id, WorkerEnv};
pub use error::WorkerError;
pub use launcher::{ExitReport, Launcher, ProcessLauncher, WorkerProcess};
pub use state::WorkerState;

use crate::broker::Connector;
use crate::client::{ChannelClient, ClientError, ClientEvent, ClientEvents};
use crate::config::DigsConfig;
use digs_protocol::command::INIT;
use digs_protocol::{ErrorReply, InitReply, LogLevel, LogRecord, Message};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Supervision parameters shared by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub namespace: String,
    pub project: String,
    /// Broker address handed to worker processes.
    pub broker_host: String,
    pub broker_port: u16,
    pub ready_timeout: Duration,
    pub retry_interval: Duration,
    pub max_retries: u32,
    pub request_timeout: Option<Duration>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&DigsConfig::default())
    }
}

impl WorkerSettings {
    #[must_use]
    pub fn from_config(config: &DigsConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            project: config.project.clone(),
            broker_host: config.broker.host.clone(),
            broker_port: config.broker.port,
            ready_timeout: config.worker.ready_timeout(),
            retry_interval: config.worker.retry_interval(),
            max_retries: config.worker.max_retries,
            request_timeout: config.timeouts.request_timeout(),
        }
    }
}

/// What a ready worker reported about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// Client id of this worker instance, `{board}-{k}`.
    pub worker_id: String,
    /// Board id from the `init` reply.
    pub board_id: String,
    /// Hardware port from the `init` reply.
    pub port: Option<String>,
}

type StartOutcome = Result<WorkerIdentity, WorkerError>;

/// Drives one worker through its lifecycle.
#[derive(Debug)]
pub struct WorkerSupervisor {
    name: String,
    init_options: Map<String, Value>,
    connector: Arc<dyn Connector>,
    launcher: Arc<dyn Launcher>,
    settings: WorkerSettings,
    state: Arc<watch::Sender<WorkerState>>,
    active: Mutex<Option<ActiveWorker>>,
    start_gate: tokio::sync::Mutex<Option<StartOutcome>>,
    generation: AtomicU64,
    attempts: AtomicU64,
    /// Bumped by `stop`. A start cancels once it differs from the value
    /// seen when that start was called.
    stops: watch::Sender<u64>,
}

#[derive(Debug)]
struct ActiveWorker {
    client: ChannelClient,
    identity: WorkerIdentity,
    stop: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

/// A worker that finished the handshake.
struct Handshake {
    client: ChannelClient,
    events: ClientEvents,
    process: Box<dyn WorkerProcess>,
    identity: WorkerIdentity,
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error("could not connect to broker: {0}")]
    Connect(#[source] ClientError),

    #[error("could not launch worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker {0} before becoming ready")]
    Exited(ExitReport),

    #[error("worker not ready after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("lost broker connection during startup")]
    Disconnected,

    #[error("init request failed: {0}")]
    Init(#[source] ClientError),

    #[error("init rejected by worker: {0}")]
    Rejected(String),

    #[error("init reply unreadable: {0}")]
    InvalidReply(String),

    #[error("init reply carried no board id")]
    MissingId,

    #[error("stopped during start-up")]
    Stopped,
}

impl WorkerSupervisor {
    /// Creates an idle supervisor for the board `name`.
    ///
    /// `init_options` is sent verbatim as the `init` payload.
    pub fn new(
        name: impl Into<String>,
        init_options: Map<String, Value>,
        connector: Arc<dyn Connector>,
        launcher: Arc<dyn Launcher>,
        settings: WorkerSettings,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            name: name.into(),
            init_options,
            connector,
            launcher,
            settings,
            state: Arc::new(state),
            active: Mutex::new(None),
            start_gate: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            stops: watch::channel(0).0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watches state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == WorkerState::Ready
    }

    /// Identity of the ready worker.
    #[must_use]
    pub fn identity(&self) -> Option<WorkerIdentity> {
        if !self.is_ready() {
            return None;
        }
        self.active.lock().as_ref().map(|a| a.identity.clone())
    }

    /// Client connected to the ready worker.
    #[must_use]
    pub fn client(&self) -> Option<ChannelClient> {
        if !self.is_ready() {
            return None;
        }
        self.active.lock().as_ref().map(|a| a.client.clone())
    }

    /// Fork attempts made over this supervisor's lifetime.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Brings the worker to `Ready`.
    ///
    /// Returns immediately if it already is. If another start is in
    /// flight, waits for it and returns its outcome.
    ///
    /// # Errors
    ///
    /// [`WorkerError::Fork`] or [`WorkerError::NotReady`] once every
    /// attempt has failed, [`WorkerError::Stopped`] if [`stop`](Self::stop)
    /// was called before the worker became ready.
    pub async fn start(&self) -> Result<WorkerIdentity, WorkerError> {
        if let Some(identity) = self.identity() {
            return Ok(identity);
        }

        let epoch = *self.stops.borrow();
        let seen = self.generation.load(Ordering::Acquire);
        let mut last = self.start_gate.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(outcome) = last.as_ref() {
                return outcome.clone();
            }
        }
        if let Some(identity) = self.identity() {
            return Ok(identity);
        }

        let outcome = self.run_attempts(epoch).await;
        *last = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    /// Stops the worker and disconnects its client.
    ///
    /// A start in flight is cancelled and torn down before this returns.
    /// Idempotent.
    pub async fn stop(&self) {
        self.cancel();
        let _gate = self.start_gate.lock().await;

        let active = self.active.lock().take();
        let Some(active) = active else { return };

        let _ = active.stop.send(());
        if let Err(e) = active.monitor.await {
            debug!(worker = %active.identity.worker_id, error = %e, "monitor ended abnormally");
        }
        active.client.disconnect();
        self.set_state(WorkerState::Terminated);
        info!(worker = %active.identity.worker_id, "worker stopped");
    }

    /// Cancels a start in flight without waiting for it.
    ///
    /// A later [`start`](Self::start) is unaffected.
    pub fn cancel(&self) {
        self.stops.send_modify(|stops| *stops += 1);
    }

    /// Resolves once `stop` has been called after `epoch` was read.
    fn stopped(&self, epoch: u64) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut stops = self.stops.subscribe();
        async move {
            let _ = stops.wait_for(|current| *current != epoch).await;
        }
    }

    async fn run_attempts(&self, epoch: u64) -> StartOutcome {
        self.discard_active();

        let max = self.settings.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.set_state(WorkerState::Forking { attempt });

            let failure = match self.attempt(attempt, epoch).await {
                Ok(handshake) => return Ok(self.activate(handshake)),
                Err(failure) => failure,
            };
            if matches!(failure, AttemptError::Stopped) {
                return Err(self.give_up(failure, attempt));
            }

            warn!(worker = %self.name, attempt, max, error = %failure, "worker attempt failed");
            self.set_state(WorkerState::Failed { attempt });
            if attempt >= max {
                return Err(self.give_up(failure, attempt));
            }
            tokio::select! {
                biased;
                () = self.stopped(epoch) => return Err(self.give_up(AttemptError::Stopped, attempt)),
                () = tokio::time::sleep(self.settings.retry_interval) => {}
            }
        }
    }

    fn give_up(&self, failure: AttemptError, attempts: u32) -> WorkerError {
        self.set_state(WorkerState::Terminated);
        if matches!(failure, AttemptError::Stopped) {
            info!(worker = %self.name, attempts, "worker start cancelled");
            return WorkerError::Stopped {
                worker: self.name.clone(),
                attempts,
            };
        }

        error!(worker = %self.name, attempts, error = %failure, "worker failed to start");
        match failure {
            AttemptError::Spawn(source) => WorkerError::Fork {
                worker: self.name.clone(),
                attempts,
                source: Arc::new(source),
            },
            other => WorkerError::NotReady {
                worker: self.name.clone(),
                attempts,
                reason: other.to_string(),
            },
        }
    }

    async fn attempt(&self, attempt: u32, epoch: u64) -> Result<Handshake, AttemptError> {
        let k = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let worker_id = format!("{}-{k}", self.name);
        let env = WorkerEnv {
            broker_host: self.settings.broker_host.clone(),
            broker_port: self.settings.broker_port,
            worker_id: worker_id.clone(),
            namespace: self.settings.namespace.clone(),
            project: self.settings.project.clone(),
        };

        let (client, mut events) = ChannelClient::builder(&worker_id)
            .namespace(&self.settings.namespace)
            .project(&self.settings.project)
            .subscribe_to(env.peon_id())
            .request_timeout(self.settings.request_timeout)
            .connect(self.connector.as_ref())
            .await
            .map_err(AttemptError::Connect)?;

        let mut process = match self.launcher.launch(&env).await {
            Ok(process) => process,
            Err(e) => {
                client.disconnect();
                return Err(AttemptError::Spawn(e));
            }
        };
        debug!(worker = %worker_id, attempt, pid = ?process.id(), "worker launched");

        self.set_state(WorkerState::OnlineWait { attempt });
        let limit = self.settings.ready_timeout;
        let outcome = tokio::select! {
            biased;
            () = self.stopped(epoch) => Err(AttemptError::Stopped),
            handshake = tokio::time::timeout(
                limit,
                self.handshake(attempt, &worker_id, &client, &mut events, process.as_mut()),
            ) => handshake.unwrap_or(Err(AttemptError::Timeout(limit))),
        };

        match outcome {
            Ok(reply) => Ok(Handshake {
                client,
                events,
                process,
                identity: WorkerIdentity {
                    worker_id,
                    board_id: reply.id,
                    port: reply.port,
                },
            }),
            Err(failure) => {
                process.kill().await;
                client.disconnect();
                Err(failure)
            }
        }
    }

    async fn handshake(
        &self,
        attempt: u32,
        worker_id: &str,
        client: &ChannelClient,
        events: &mut ClientEvents,
        process: &mut dyn WorkerProcess,
    ) -> Result<InitReply, AttemptError> {
        loop {
            tokio::select! {
                exit = process.wait() => return Err(AttemptError::Exited(exit)),
                event = events.recv() => match event {
                    Some(ClientEvent::Message { message: Message::Online(online), .. }) => {
                        debug!(worker = %worker_id, peon = %online.client_id, "worker online");
                        break;
                    }
                    Some(ClientEvent::Message { message: Message::Log(record), .. }) => {
                        log_worker(worker_id, &record);
                    }
                    Some(ClientEvent::Disconnected) | None => return Err(AttemptError::Disconnected),
                    Some(other) => trace!(worker = %worker_id, event = ?other, "ignored before online"),
                },
            }
        }

        self.set_state(WorkerState::Initializing { attempt });
        let request = Message::command(INIT, &self.init_options)
            .map_err(|e| AttemptError::Init(e.into()))?;
        let reply = tokio::select! {
            exit = process.wait() => return Err(AttemptError::Exited(exit)),
            reply = client.request(request) => reply.map_err(AttemptError::Init)?,
        };

        let payload = reply.into_payload();
        if let Some(error) = ErrorReply::detect(&payload) {
            return Err(AttemptError::Rejected(error.to_string()));
        }
        let init: InitReply = serde_json::from_value(payload)
            .map_err(|e| AttemptError::InvalidReply(e.to_string()))?;
        if init.id.is_empty() {
            return Err(AttemptError::MissingId);
        }
        Ok(init)
    }

    fn activate(&self, handshake: Handshake) -> WorkerIdentity {
        let Handshake {
            client,
            events,
            process,
            identity,
        } = handshake;

        let (stop, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(
            identity.worker_id.clone(),
            process,
            events,
            stop_rx,
            Arc::clone(&self.state),
        ));
        *self.active.lock() = Some(ActiveWorker {
            client,
            identity: identity.clone(),
            stop,
            monitor,
        });
        self.set_state(WorkerState::Ready);
        info!(
            worker = %identity.worker_id,
            board = %identity.board_id,
            port = ?identity.port,
            "worker ready"
        );
        identity
    }

    /// Drops a worker left over from an earlier start that has since exited.
    fn discard_active(&self) {
        if let Some(stale) = self.active.lock().take() {
            debug!(worker = %stale.identity.worker_id, "discarding exited worker");
            stale.client.disconnect();
            stale.monitor.abort();
        }
    }

    fn set_state(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(worker = %self.name, from = %previous, to = %next, "worker state");
        }
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            let _ = active.stop.send(());
            active.client.disconnect();
        }
    }
}

/// Watches a ready worker until it exits or is stopped.
async fn monitor(
    worker_id: String,
    mut process: Box<dyn WorkerProcess>,
    mut events: ClientEvents,
    mut stop: oneshot::Receiver<()>,
    state: Arc<watch::Sender<WorkerState>>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => {
                process.kill().await;
                break;
            }
            exit = process.wait() => {
                warn!(worker = %worker_id, %exit, "worker exited");
                break;
            }
            event = events.recv() => match event {
                Some(ClientEvent::Message { message: Message::Log(record), .. }) => {
                    log_worker(&worker_id, &record);
                }
                Some(ClientEvent::Message { message: Message::Error(fault), .. }) => {
                    error!(worker = %worker_id, message = %fault.message, "worker reported an error");
                }
                Some(ClientEvent::Malformed { topic, error }) => {
                    debug!(worker = %worker_id, %topic, %error, "malformed message from worker");
                }
                Some(ClientEvent::Disconnected) | None => {
                    warn!(worker = %worker_id, "lost broker connection to worker");
                    process.kill().await;
                    break;
                }
                Some(other) => trace!(worker = %worker_id, event = ?other, "worker event"),
            },
        }
    }
    state.send_replace(WorkerState::Terminated);
}

fn log_worker(worker: &str, record: &LogRecord) {
    let message = &record.message;
    match record.level {
        LogLevel::Trace => trace!(worker, "{message}"),
        LogLevel::Debug => debug!(worker, "{message}"),
        LogLevel::Info => info!(worker, "{message}"),
        LogLevel::Warn => warn!(worker, "{message}"),
        LogLevel::Error => error!(worker, "{message}"),
    }
}
