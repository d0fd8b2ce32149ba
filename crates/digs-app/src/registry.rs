//! Board registry.
//!
//! Holds every configured [`Board`] under its unique id. Ids come from a
//! single [`SlugAllocator`] owned by the registry: boards with an explicit
//! `id` claim it first, the rest get a slug of their name.

use digs_runtime::{Board, BoardConfig, BoardContext, BoardError, BoardSnapshot, DigsConfig};
use digs_types::{CollisionError, SlugAllocator};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Outcome of [`BoardRegistry::start_all`].
#[derive(Debug, Default)]
pub struct StartReport {
    /// Ids of boards that became ready, sorted.
    pub started: Vec<String>,
    /// Boards that failed, with the reason, sorted by id.
    pub failed: Vec<(String, BoardError)>,
}

impl StartReport {
    #[must_use]
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }
}

/// All boards known to the process.
#[derive(Debug)]
pub struct BoardRegistry {
    context: BoardContext,
    slugs: SlugAllocator,
    boards: BTreeMap<String, Arc<Board>>,
}

impl BoardRegistry {
    #[must_use]
    pub fn new(context: BoardContext) -> Self {
        Self {
            context,
            slugs: SlugAllocator::new(),
            boards: BTreeMap::new(),
        }
    }

    /// Builds a registry with every board in `config.boards`.
    ///
    /// # Errors
    ///
    /// Returns [`CollisionError`] if two boards share an explicit id.
    pub fn from_config(config: &DigsConfig, context: BoardContext) -> Result<Self, CollisionError> {
        let mut registry = Self::new(context);
        let (explicit, derived): (Vec<_>, Vec<_>) = config
            .boards
            .iter()
            .partition(|(_, board)| board.id.is_some());
        for (key, board) in explicit.into_iter().chain(derived) {
            registry.insert(key, board.clone())?;
        }
        Ok(registry)
    }

    /// Creates a stopped board and registers it.
    ///
    /// # Errors
    ///
    /// Returns [`CollisionError`] if `config.id` is taken.
    pub fn insert(&mut self, key: &str, config: BoardConfig) -> Result<Arc<Board>, CollisionError> {
        let board = Board::new(key, config, &self.context, &mut self.slugs)?;
        self.boards.insert(board.id().to_string(), Arc::clone(&board));
        Ok(board)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<Board>> {
        self.boards.get(id)
    }

    /// Boards ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Board>> {
        self.boards.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.boards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    #[must_use]
    pub fn ready_ids(&self) -> Vec<String> {
        self.iter()
            .filter(|b| b.is_ready())
            .map(|b| b.id().to_string())
            .collect()
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<BoardSnapshot> {
        self.iter().map(|b| b.snapshot()).collect()
    }

    /// Starts every board concurrently.
    ///
    /// A board that fails does not stop the others.
    pub async fn start_all(&self) -> StartReport {
        let mut pending = JoinSet::new();
        for board in self.boards.values() {
            let board = Arc::clone(board);
            pending.spawn(async move {
                let result = board.start().await.map(|_| ());
                (board.id().to_string(), result)
            });
        }

        let mut report = StartReport::default();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((id, Ok(()))) => report.started.push(id),
                Ok((id, Err(e))) => {
                    warn!(board = %id, error = %e, "board failed to start");
                    report.failed.push((id, e));
                }
                Err(e) => warn!(error = %e, "board start task failed"),
            }
        }
        report.started.sort();
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "boards started"
        );
        report
    }

    /// Stops every board.
    pub async fn stop_all(&self) {
        let mut pending = JoinSet::new();
        for board in self.boards.values() {
            let board = Arc::clone(board);
            pending.spawn(async move { board.stop().await });
        }
        while pending.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digs_runtime::{Connector, InProcessLauncher, LocalBroker, SimHardware, WorkerSettings};
    use std::time::Duration;

    fn context(broker: &LocalBroker) -> BoardContext {
        let connector: Arc<dyn Connector> = Arc::new(broker.clone());
        BoardContext {
            launcher: Arc::new(InProcessLauncher::new(
                Arc::clone(&connector),
                Arc::new(SimHardware::new()),
            )),
            connector,
            settings: WorkerSettings {
                ready_timeout: Duration::from_millis(500),
                retry_interval: Duration::from_millis(5),
                ..WorkerSettings::default()
            },
        }
    }

    #[test]
    fn explicit_ids_are_claimed_before_slugs() {
        let config = DigsConfig::from_toml(
            r#"
[boards.a]
name = "Garage"

[boards.b]
id = "garage"
"#,
        )
        .unwrap();
        let registry = BoardRegistry::from_config(&config, context(&LocalBroker::new())).unwrap();

        let ids: Vec<_> = registry.iter().map(|b| b.id().to_string()).collect();
        assert_eq!(ids, vec!["garage", "garage-1"]);
        assert_eq!(registry.get("garage-1").unwrap().name(), "Garage");
    }

    #[test]
    fn duplicate_explicit_ids_collide() {
        let config = DigsConfig::from_toml(
            r#"
[boards.a]
id = "uno"

[boards.b]
id = "uno"
"#,
        )
        .unwrap();
        match BoardRegistry::from_config(&config, context(&LocalBroker::new())) {
            Err(CollisionError { id }) => assert_eq!(id, "uno"),
            other => panic!("expected CollisionError, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_and_stop_all() {
        let broker = LocalBroker::new();
        let mut registry = BoardRegistry::new(context(&broker));
        registry.insert("uno", BoardConfig::default()).unwrap();
        registry.insert("mega", BoardConfig::default()).unwrap();
        assert!(registry.ready_ids().is_empty());

        let report = registry.start_all().await;
        assert!(report.all_started());
        assert_eq!(report.started, vec!["mega", "uno"]);
        assert_eq!(registry.ready_ids(), vec!["mega", "uno"]);
        assert!(registry.snapshots().iter().all(|s| s.ready));

        registry.stop_all().await;
        assert!(registry.ready_ids().is_empty());
    }
}
