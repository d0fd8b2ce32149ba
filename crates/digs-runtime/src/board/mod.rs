//! Boards.
//!
//! A [`Board`] is the unit of configuration: one worker and the
//! [`Component`]s living on it.
//!
//! ```text
//!  Board "uno" ──owns──► WorkerSupervisor ──owns──► worker process
//!     │                        │                    ChannelClient
//!     └──owns──► components {id → Arc<Component>}
//!                                  │
//!                                  └──weak──► Board
//! ```
//!
//! Starting a board starts its worker, then instantiates the configured
//! components concurrently. A component that fails is logged and
//! skipped; the board still comes up with the rest.

mod component;
mod error;

pub use component::{normalize_class, Component, ComponentSnapshot};
pub use error::{BoardError, ComponentError};

use crate::broker::Connector;
use crate::config::BoardConfig;
use crate::worker::{Launcher, WorkerSettings, WorkerSupervisor};
use digs_protocol::Message;
use digs_types::{CollisionError, SlugAllocator};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Shared plumbing every board needs to run a worker.
#[derive(Debug, Clone)]
pub struct BoardContext {
    pub connector: Arc<dyn Connector>,
    pub launcher: Arc<dyn Launcher>,
    pub settings: WorkerSettings,
}

/// Serializable view of a board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardSnapshot {
    pub id: String,
    pub name: String,
    pub port: Option<String>,
    pub connected: bool,
    pub ready: bool,
    pub components: Vec<ComponentSnapshot>,
    pub options: Map<String, Value>,
}

#[derive(Debug)]
pub struct Board {
    id: String,
    name: String,
    config: BoardConfig,
    worker: WorkerSupervisor,
    components: Mutex<BTreeMap<String, Arc<Component>>>,
    port: Mutex<Option<String>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Board {
    /// Creates a stopped board.
    ///
    /// The id is `config.id` if set, otherwise a slug of the name (or
    /// `key`) made unique through `slugs`.
    ///
    /// # Errors
    ///
    /// Returns [`CollisionError`] if an explicit id is already taken.
    pub fn new(
        key: &str,
        config: BoardConfig,
        context: &BoardContext,
        slugs: &mut SlugAllocator,
    ) -> Result<Arc<Self>, CollisionError> {
        let name = config.name.clone().unwrap_or_else(|| key.to_string());
        let id = match &config.id {
            Some(id) => {
                slugs.claim(id)?;
                id.clone()
            }
            None => slugs.allocate(&name),
        };

        let worker = WorkerSupervisor::new(
            id.clone(),
            config.init_options(&id),
            Arc::clone(&context.connector),
            Arc::clone(&context.launcher),
            context.settings.clone(),
        );
        debug!(board = %id, name = %name, "board created");

        Ok(Arc::new(Self {
            port: Mutex::new(config.port.clone()),
            id,
            name,
            config,
            worker,
            components: Mutex::new(BTreeMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        }))
    }

    /// Starts the worker and the configured components.
    ///
    /// Idempotent while ready. A restart keeps the id and discards
    /// every component.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Worker`] if the worker cannot be brought up.
    /// Component failures are not errors.
    pub async fn start(self: &Arc<Self>) -> Result<Arc<Self>, BoardError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_ready() {
            return Ok(Arc::clone(self));
        }

        self.components.lock().clear();
        info!(board = %self.id, "starting board");
        let identity = self.worker.start().await?;
        if identity.port.is_some() {
            *self.port.lock() = identity.port.clone();
        }

        if self.config.components.is_empty() {
            warn!(board = %self.id, "no components configured");
        }

        let mut pending = JoinSet::new();
        for entry in self.config.components.clone() {
            let board = Arc::clone(self);
            pending.spawn(async move {
                let result = board
                    .component(&entry.class, entry.instantiate_options())
                    .await;
                (entry.class, result)
            });
        }
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((class, Ok(component))) => {
                    debug!(board = %self.id, %class, component = ?component.id(), "component ready");
                }
                Ok((class, Err(e))) => {
                    warn!(board = %self.id, %class, error = %e, "component failed, skipping");
                }
                Err(e) => warn!(board = %self.id, error = %e, "component task failed"),
            }
        }

        info!(
            board = %self.id,
            port = ?self.port(),
            components = self.components.lock().len(),
            "board ready"
        );
        Ok(Arc::clone(self))
    }

    /// Creates a component on the running worker and registers it.
    ///
    /// # Errors
    ///
    /// See [`Component::instantiate`].
    pub async fn component(
        self: &Arc<Self>,
        class: &str,
        options: Map<String, Value>,
    ) -> Result<Arc<Component>, ComponentError> {
        let mut component = Component::new(self, class, options);
        component.instantiate().await?;

        let component = Arc::new(component);
        if let Some(id) = component.id() {
            self.components
                .lock()
                .insert(id.to_string(), Arc::clone(&component));
        }
        Ok(component)
    }

    /// Stops the worker and drops every component.
    ///
    /// A start in flight is cancelled rather than waited out. Idempotent.
    pub async fn stop(&self) {
        // Releases a `start` holding the lifecycle lock through its retries.
        self.worker.cancel();
        let _lifecycle = self.lifecycle.lock().await;
        self.worker.stop().await;
        let dropped = std::mem::take(&mut *self.components.lock());
        if !dropped.is_empty() {
            debug!(board = %self.id, components = dropped.len(), "components dropped");
        }
    }

    /// Sends a request to the worker.
    ///
    /// # Errors
    ///
    /// [`BoardError::NotConnected`] without a ready worker, otherwise
    /// whatever the request fails with.
    pub async fn request(&self, message: Message) -> Result<Message, BoardError> {
        let client = self.worker.client().ok_or_else(|| self.not_connected())?;
        Ok(client.request(message).await?)
    }

    /// Publishes on the worker's channel.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn publish(&self, message: &Message) -> Result<(), BoardError> {
        let client = self.worker.client().ok_or_else(|| self.not_connected())?;
        Ok(client.publish(message).await?)
    }

    fn not_connected(&self) -> BoardError {
        BoardError::NotConnected {
            board: self.id.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    #[must_use]
    pub fn worker(&self) -> &WorkerSupervisor {
        &self.worker
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.worker.is_ready()
    }

    /// Port reported by the worker, or the configured one.
    #[must_use]
    pub fn port(&self) -> Option<String> {
        self.port.lock().clone()
    }

    /// Registered components, ordered by id.
    #[must_use]
    pub fn components(&self) -> Vec<Arc<Component>> {
        self.components.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn get_component(&self, id: &str) -> Option<Arc<Component>> {
        self.components.lock().get(id).cloned()
    }

    #[must_use]
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            port: self.port(),
            connected: self.worker.client().is_some_and(|c| c.is_connected()),
            ready: self.is_ready(),
            components: self.components().iter().map(|c| c.snapshot()).collect(),
            options: self.config.options.clone(),
        }
    }
}
