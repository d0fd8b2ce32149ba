//! In-memory broker.

use super::{BrokerError, Connection, Connector, Link, Packet};
use async_trait::async_trait;
use digs_protocol::filter_matches;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Routes packets between sessions in the same process.
///
/// Cloning yields another handle to the same broker. The TCP broker
/// uses one of these as its routing core.
///
/// Besides normal routing it exposes hooks for exercising failure
/// paths: [`drop_client`](Self::drop_client) severs a client's
/// sessions, [`shutdown`](Self::shutdown) severs everything and refuses
/// new sessions, and [`tap`](Self::tap) observes every publish in wire
/// order.
#[derive(Debug, Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    sessions: BTreeMap<u64, Session>,
    next_session: u64,
    taps: Vec<mpsc::UnboundedSender<Packet>>,
    shut_down: bool,
}

#[derive(Debug)]
struct Session {
    client_id: String,
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<Packet>,
}

impl LocalBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session and returns its id and inbound stream.
    pub(crate) fn open_session(
        &self,
        client_id: &str,
    ) -> Result<(u64, mpsc::UnboundedReceiver<Packet>), BrokerError> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(BrokerError::Closed);
        }

        state.next_session += 1;
        let id = state.next_session;
        let (tx, rx) = mpsc::unbounded_channel();
        state.sessions.insert(
            id,
            Session {
                client_id: client_id.to_string(),
                filters: Vec::new(),
                tx,
            },
        );
        debug!(client = client_id, session = id, "session opened");
        Ok((id, rx))
    }

    pub(crate) fn add_filter(&self, session: u64, filter: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let entry = state.sessions.get_mut(&session).ok_or(BrokerError::Closed)?;
        if !entry.filters.iter().any(|f| f == filter) {
            entry.filters.push(filter.to_string());
        }
        Ok(())
    }

    pub(crate) fn close_session(&self, session: u64) {
        if let Some(entry) = self.state.lock().sessions.remove(&session) {
            debug!(client = %entry.client_id, session, "session closed");
        }
    }

    /// Delivers `packet` to every session with a matching filter.
    ///
    /// Returns the number of sessions it was delivered to.
    pub fn route(&self, packet: Packet) -> usize {
        let mut state = self.state.lock();

        state.taps.retain(|tap| tap.send(packet.clone()).is_ok());

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, session) in &state.sessions {
            if !session.filters.iter().any(|f| filter_matches(f, &packet.topic)) {
                continue;
            }
            if session.tx.send(packet.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            state.sessions.remove(&id);
        }

        trace!(topic = %packet.topic, delivered, "routed");
        delivered
    }

    /// Severs every session opened by `client_id`.
    ///
    /// Their inbound streams close as if the network dropped. Returns
    /// the number of sessions removed.
    pub fn drop_client(&self, client_id: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.client_id != client_id);
        before - state.sessions.len()
    }

    /// Severs all sessions and refuses new ones.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        state.sessions.clear();
        state.taps.clear();
    }

    /// Returns a stream of every packet published from now on.
    pub fn tap(&self) -> mpsc::UnboundedReceiver<Packet> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().taps.push(tx);
        rx
    }

    /// Client ids with an open session, in session order.
    #[must_use]
    pub fn client_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .sessions
            .values()
            .map(|s| s.client_id.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for LocalBroker {
    async fn connect(&self, client_id: &str) -> Result<Connection, BrokerError> {
        let (session, inbound) = self.open_session(client_id)?;
        Ok(Connection {
            link: Arc::new(LocalLink {
                broker: self.clone(),
                session,
            }),
            inbound,
        })
    }
}

#[derive(Debug)]
struct LocalLink {
    broker: LocalBroker,
    session: u64,
}

#[async_trait]
impl Link for LocalLink {
    async fn subscribe(&self, filter: &str) -> Result<(), BrokerError> {
        self.broker.add_filter(self.session, filter)
    }

    async fn publish(&self, packet: Packet) -> Result<(), BrokerError> {
        if !self.broker.state.lock().sessions.contains_key(&self.session) {
            return Err(BrokerError::Closed);
        }
        self.broker.route(packet);
        Ok(())
    }

    fn close(&self) {
        self.broker.close_session(self.session);
    }
}

impl Drop for LocalLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_to_matching_sessions_once() {
        let broker = LocalBroker::new();
        let mut a = broker.connect("a").await.unwrap();
        let mut b = broker.connect("b").await.unwrap();

        a.link.subscribe("digs/home/x/#").await.unwrap();
        a.link.subscribe("digs/home/+/ping").await.unwrap();
        b.link.subscribe("digs/home/y/#").await.unwrap();

        b.link
            .publish(Packet::new("digs/home/x/ping", "{}"))
            .await
            .unwrap();

        assert_eq!(a.inbound.recv().await.unwrap().topic, "digs/home/x/ping");
        assert!(a.inbound.try_recv().is_err());
        assert!(b.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_client_closes_inbound() {
        let broker = LocalBroker::new();
        let mut conn = broker.connect("victim").await.unwrap();
        assert_eq!(broker.drop_client("victim"), 1);
        assert!(conn.inbound.recv().await.is_none());
        assert!(matches!(
            conn.link.publish(Packet::new("a/b/c/d", "1")).await,
            Err(BrokerError::Closed)
        ));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_sessions() {
        let broker = LocalBroker::new();
        broker.shutdown();
        assert!(matches!(
            broker.connect("late").await,
            Err(BrokerError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropping_link_ends_session() {
        let broker = LocalBroker::new();
        let conn = broker.connect("short-lived").await.unwrap();
        assert_eq!(broker.client_ids(), vec!["short-lived".to_string()]);
        drop(conn);
        assert!(broker.client_ids().is_empty());
    }

    #[tokio::test]
    async fn tap_sees_every_publish() {
        let broker = LocalBroker::new();
        let mut tap = broker.tap();
        let conn = broker.connect("pub").await.unwrap();
        conn.link.publish(Packet::new("a/b/c/one", "1")).await.unwrap();
        conn.link.publish(Packet::new("a/b/c/two", "2")).await.unwrap();
        assert_eq!(tap.recv().await.unwrap().topic, "a/b/c/one");
        assert_eq!(tap.recv().await.unwrap().topic, "a/b/c/two");
    }
}
