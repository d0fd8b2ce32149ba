//! Worker-side command dispatcher.
//!
//! The peon is what runs inside a worker. It owns the open board and
//! every device created on it, and answers the central process's
//! requests:
//!
//! | Command | Reply |
//! |---------|-------|
//! | `init {..options}` | `{id, port?}` |
//! | `instantiate {componentClass, opts}` | `{id, componentClass}` |
//! | `dir {id}` / `dir {componentClass}` | `{methods}` (public only) |
//! | `execute {id, method, args}` | the method's return value |
//!
//! Any failure is answered with `{error: "..."}` on the same request id.

mod hardware;
mod launcher;
mod sim;

pub use hardware::{public_methods, BoardInfo, Device, DeviceError, Hardware};
pub use launcher::InProcessLauncher;
pub use sim::SimHardware;

use crate::broker::Connector;
use crate::client::{ChannelClient, ClientError, ClientEvent, ClientEvents};
use crate::worker::WorkerEnv;
use digs_protocol::command::INIT;
use digs_protocol::{
    Command, DirReply, DirRequest, ErrorReply, ExecuteRequest, Fault, InitReply,
    InstantiateReply, InstantiateRequest, LogLevel, Message, Ready,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Default time allowed for the hardware to open.
pub const DEFAULT_BOARD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct OpenBoard {
    id: String,
    port: Option<String>,
}

/// Dispatches commands to live hardware.
#[derive(Debug)]
pub struct Peon {
    hardware: Arc<dyn Hardware>,
    ready_timeout: Duration,
    board: Option<OpenBoard>,
    components: BTreeMap<String, Box<dyn Device>>,
    class_counters: HashMap<String, u64>,
    boards_opened: u64,
}

impl Peon {
    pub fn new(hardware: Arc<dyn Hardware>) -> Self {
        Self {
            hardware,
            ready_timeout: DEFAULT_BOARD_TIMEOUT,
            board: None,
            components: BTreeMap::new(),
            class_counters: HashMap::new(),
            boards_opened: 0,
        }
    }

    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Connects as `{worker}-peon` and serves until the session ends.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the broker cannot be reached.
    pub async fn run(self, env: &WorkerEnv, connector: &dyn Connector) -> Result<(), ClientError> {
        let (client, events) = ChannelClient::builder(env.peon_id())
            .namespace(&env.namespace)
            .project(&env.project)
            .subscribe_to(&env.worker_id)
            .request_timeout(None)
            .connect(connector)
            .await?;
        info!(peon = %client.id(), worker = %env.worker_id, "peon online");
        self.serve(client, events).await;
        Ok(())
    }

    /// Answers requests arriving on `events` until disconnected.
    pub async fn serve(mut self, client: ChannelClient, mut events: ClientEvents) {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Request {
                    message, responder, ..
                } => {
                    let reply = match message {
                        Message::Command { name, payload } => match Command::parse(&name, payload) {
                            Ok(command) => self.dispatch(&client, command).await,
                            Err(e) => ErrorReply::new(e.to_string()).into_value(),
                        },
                        other => {
                            ErrorReply::new(format!("Unsupported request \"{}\"", other.path()))
                                .into_value()
                        }
                    };
                    if let Err(e) = responder.reply_value(reply).await {
                        warn!(peon = %client.id(), error = %e, "reply failed");
                    }
                }
                ClientEvent::Message { topic, .. } => {
                    trace!(peon = %client.id(), %topic, "ignoring message");
                }
                ClientEvent::Malformed { topic, error } => {
                    warn!(peon = %client.id(), %topic, %error, "malformed request");
                }
                ClientEvent::Disconnected => break,
            }
        }
        debug!(peon = %client.id(), components = self.components.len(), "peon stopped");
    }

    async fn dispatch(&mut self, client: &ChannelClient, command: Command) -> Value {
        let is_init = command.name() == INIT;
        let reply = self.handle(command).await;
        if is_init {
            for announcement in self.init_announcements(&reply) {
                if let Err(e) = client.publish(&announcement).await {
                    warn!(
                        peon = %client.id(),
                        path = announcement.path(),
                        error = %e,
                        "announcement failed"
                    );
                }
            }
        }
        reply
    }

    /// What to publish after answering `init`: a log line and `ready`, or
    /// `error` with the reason.
    fn init_announcements(&self, reply: &Value) -> Vec<Message> {
        match (ErrorReply::detect(reply), &self.board) {
            (Some(error), _) => vec![Message::Error(Fault {
                message: error.to_string(),
            })],
            (None, Some(board)) => {
                let line = format!(
                    "board {} ready on {}",
                    board.id,
                    board.port.as_deref().unwrap_or("unknown port")
                );
                vec![
                    Message::log(LogLevel::Info, line),
                    Message::Ready(Ready {
                        id: board.id.clone(),
                        port: board.port.clone(),
                    }),
                ]
            }
            (None, None) => Vec::new(),
        }
    }

    /// Executes one command and returns the reply body.
    pub async fn handle(&mut self, command: Command) -> Value {
        let result = match command {
            Command::Init(options) => self.init(options).await,
            Command::Instantiate(request) => self.instantiate(request),
            Command::Dir(request) => self.dir(request),
            Command::Execute(request) => self.execute(request),
        };
        result.unwrap_or_else(|error| ErrorReply::new(error).into_value())
    }

    async fn init(&mut self, options: Map<String, Value>) -> Result<Value, String> {
        if let Some(board) = &self.board {
            return Ok(to_value(&InitReply {
                id: board.id.clone(),
                port: board.port.clone(),
            }));
        }

        let id = match options.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                self.boards_opened += 1;
                format!("board-{}", self.boards_opened)
            }
        };

        let info = match tokio::time::timeout(self.ready_timeout, self.hardware.open(&options)).await
        {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => {
                return Err(format!(
                    "Board \"{id}\" did not become ready within {}ms",
                    self.ready_timeout.as_millis()
                ))
            }
        };

        info!(board = %id, port = ?info.port, "board opened");
        let board = OpenBoard {
            id,
            port: info.port,
        };
        let reply = InitReply {
            id: board.id.clone(),
            port: board.port.clone(),
        };
        self.board = Some(board);
        Ok(to_value(&reply))
    }

    fn instantiate(&mut self, request: InstantiateRequest) -> Result<Value, String> {
        if self.board.is_none() {
            return Err("Board is not initialized".into());
        }

        let class = request.component_class;
        let id = match request.opts.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let counter = self.class_counters.entry(class.clone()).or_insert(0);
                *counter += 1;
                format!("{class}-{counter}")
            }
        };
        if self.components.contains_key(&id) {
            return Err(format!("Component with ID \"{id}\" already exists"));
        }

        let device = self
            .hardware
            .create(&class, &request.opts)
            .map_err(|e| e.to_string())?;
        debug!(component = %id, class = %class, "component created");
        self.components.insert(id.clone(), device);
        Ok(to_value(&InstantiateReply {
            id,
            component_class: class,
        }))
    }

    fn dir(&self, request: DirRequest) -> Result<Value, String> {
        let methods = match request {
            DirRequest::Id { id } => self
                .components
                .get(&id)
                .map(|device| device.methods())
                .ok_or_else(|| no_component(&id))?,
            DirRequest::Class { component_class } => self
                .hardware
                .class_methods(&component_class)
                .map_err(|e| e.to_string())?,
        };
        Ok(to_value(&DirReply {
            methods: public_methods(methods),
        }))
    }

    fn execute(&mut self, request: ExecuteRequest) -> Result<Value, String> {
        let ExecuteRequest { id, method, args } = request;
        let device = self.components.get_mut(&id).ok_or_else(|| no_component(&id))?;
        if !public_methods(device.methods()).contains(&method) {
            return Err(format!("Component with ID \"{id}\" has no method \"{method}\""));
        }
        trace!(component = %id, %method, "execute");
        device.invoke(&method, &args).map_err(|e| e.to_string())
    }
}

fn no_component(id: &str) -> String {
    format!("No component with ID \"{id}\" found")
}

fn to_value(body: &impl Serialize) -> Value {
    serde_json::to_value(body).unwrap_or_else(|e| ErrorReply::new(e.to_string()).into_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(name: &str, payload: Value) -> Command {
        Command::parse(name, payload).unwrap()
    }

    async fn ready_peon() -> Peon {
        let mut peon = Peon::new(Arc::new(SimHardware::new()));
        peon.handle(command("init", json!({"id": "uno", "port": "COM3"}))).await;
        peon
    }

    #[tokio::test]
    async fn init_defaults_id_and_is_stable() {
        let mut peon = Peon::new(Arc::new(SimHardware::new()));
        let first = peon.handle(command("init", json!({}))).await;
        assert_eq!(first, json!({"id": "board-1", "port": "sim"}));

        let again = peon.handle(command("init", json!({"id": "other"}))).await;
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn init_announcements() {
        let mut peon = Peon::new(Arc::new(SimHardware::new()));
        assert!(peon.init_announcements(&json!({})).is_empty());

        let reply = peon.handle(command("init", json!({"id": "uno"}))).await;
        let paths: Vec<_> = peon
            .init_announcements(&reply)
            .iter()
            .map(|m| m.path().to_string())
            .collect();
        assert_eq!(paths, vec!["log", "ready"]);

        let mut broken = Peon::new(Arc::new(SimHardware::new().failing("port busy")));
        let reply = broken.handle(command("init", json!({"id": "uno"}))).await;
        match broken.init_announcements(&reply).as_slice() {
            [Message::Error(fault)] => assert!(fault.message.contains("port busy")),
            other => panic!("expected one error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn init_times_out() {
        let hardware = SimHardware::new().with_open_delay(Duration::from_millis(200));
        let mut peon = Peon::new(Arc::new(hardware)).with_ready_timeout(Duration::from_millis(10));

        let reply = peon.handle(command("init", json!({"id": "slow"}))).await;
        assert_eq!(
            ErrorReply::detect(&reply),
            Some("Board \"slow\" did not become ready within 10ms")
        );
    }

    #[tokio::test]
    async fn instantiate_requires_init() {
        let mut peon = Peon::new(Arc::new(SimHardware::new()));
        let reply = peon
            .handle(command("instantiate", json!({"componentClass": "Led"})))
            .await;
        assert_eq!(ErrorReply::detect(&reply), Some("Board is not initialized"));
    }

    #[tokio::test]
    async fn instantiate_assigns_ids_per_class() {
        let mut peon = ready_peon().await;
        let a = peon
            .handle(command("instantiate", json!({"componentClass": "Led"})))
            .await;
        let b = peon
            .handle(command("instantiate", json!({"componentClass": "Led"})))
            .await;
        let named = peon
            .handle(command(
                "instantiate",
                json!({"componentClass": "Servo", "opts": {"id": "arm"}}),
            ))
            .await;

        assert_eq!(a, json!({"id": "Led-1", "componentClass": "Led"}));
        assert_eq!(b["id"], "Led-2");
        assert_eq!(named["id"], "arm");

        let dupe = peon
            .handle(command(
                "instantiate",
                json!({"componentClass": "Led", "opts": {"id": "arm"}}),
            ))
            .await;
        assert_eq!(
            ErrorReply::detect(&dupe),
            Some("Component with ID \"arm\" already exists")
        );
    }

    #[tokio::test]
    async fn unknown_class_is_reported() {
        let mut peon = ready_peon().await;
        let reply = peon
            .handle(command("instantiate", json!({"componentClass": "Bogus"})))
            .await;
        assert_eq!(ErrorReply::detect(&reply), Some("Unknown component \"Bogus\""));
    }

    #[tokio::test]
    async fn dir_lists_public_methods() {
        let mut peon = ready_peon().await;
        peon.handle(command(
            "instantiate",
            json!({"componentClass": "Relay", "opts": {"id": "pump"}}),
        ))
        .await;

        let by_id = peon.handle(command("dir", json!({"id": "pump"}))).await;
        assert_eq!(by_id, json!({"methods": ["on", "off"]}));

        let by_class = peon
            .handle(command("dir", json!({"componentClass": "Sensor"})))
            .await;
        assert_eq!(by_class, json!({"methods": ["read"]}));
    }

    #[tokio::test]
    async fn execute_error_texts() {
        let mut peon = ready_peon().await;
        peon.handle(command(
            "instantiate",
            json!({"componentClass": "Servo", "opts": {"id": "arm"}}),
        ))
        .await;

        let missing = peon
            .handle(command("execute", json!({"id": "leg", "method": "to"})))
            .await;
        assert_eq!(
            ErrorReply::detect(&missing),
            Some("No component with ID \"leg\" found")
        );

        let no_method = peon
            .handle(command("execute", json!({"id": "arm", "method": "fly"})))
            .await;
        assert_eq!(
            ErrorReply::detect(&no_method),
            Some("Component with ID \"arm\" has no method \"fly\"")
        );

        let device = peon
            .handle(command(
                "execute",
                json!({"id": "arm", "method": "to", "args": [270]}),
            ))
            .await;
        assert_eq!(ErrorReply::detect(&device), Some("Angle 270 out of range 0-180"));

        let ok = peon
            .handle(command(
                "execute",
                json!({"id": "arm", "method": "to", "args": [30]}),
            ))
            .await;
        assert_eq!(ok, json!(30.0));
    }

    #[tokio::test]
    async fn private_methods_are_not_callable() {
        let mut peon = ready_peon().await;
        peon.handle(command(
            "instantiate",
            json!({"componentClass": "Led", "opts": {"id": "status"}}),
        ))
        .await;
        let reply = peon
            .handle(command(
                "execute",
                json!({"id": "status", "method": "_reset"}),
            ))
            .await;
        assert_eq!(
            ErrorReply::detect(&reply),
            Some("Component with ID \"status\" has no method \"_reset\"")
        );
    }
}
