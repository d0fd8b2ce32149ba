//! Line-delimited JSON broker over TCP.
//!
//! # Frames
//!
//! One JSON object per line, tagged by `type`:
//!
//! | Frame | Direction | Fields |
//! |-------|-----------|--------|
//! | `connect` | client → broker | `client_id` (must be first) |
//! | `subscribe` | client → broker | `filter` |
//! | `publish` | client → broker | `topic`, `payload` |
//! | `subscribed` | broker → client | `filter` |
//! | `deliver` | broker → client | `topic`, `payload` |
//!
//! `subscribed` acknowledges a `subscribe` once the filter is routable,
//! so [`Link::subscribe`] returning means later publishes will match.
//!
//! Routing is delegated to a [`LocalBroker`], so matching and delivery
//! semantics are identical to the in-memory broker.

use super::{BrokerError, Connection, Connector, Link, LocalBroker, Packet};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Connect { client_id: String },
    Subscribe { filter: String },
    Subscribed { filter: String },
    Publish { topic: String, payload: String },
    Deliver { topic: String, payload: String },
}

impl Frame {
    fn to_line(&self) -> Result<Vec<u8>, BrokerError> {
        let mut line = serde_json::to_vec(self).map_err(|e| BrokerError::Frame {
            reason: e.to_string(),
        })?;
        line.push(b'\n');
        Ok(line)
    }
}

/// TCP broker server.
#[derive(Debug)]
pub struct TcpBroker {
    listener: TcpListener,
    core: LocalBroker,
}

impl TcpBroker {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Unreachable`] if the address cannot be bound.
    pub async fn bind(addr: &str) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BrokerError::Unreachable {
                endpoint: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            core: LocalBroker::new(),
        })
    }

    /// The bound address. Useful after binding port 0.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Io`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
        Ok(self.listener.local_addr()?)
    }

    /// The routing core shared by all connections.
    #[must_use]
    pub fn core(&self) -> &LocalBroker {
        &self.core
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// On shutdown every session is severed.
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send) {
        let addr = self.listener.local_addr().ok();
        info!(addr = ?addr, "broker listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "broker connection accepted");
                        tokio::spawn(serve_connection(stream, self.core.clone()));
                    }
                    Err(e) => warn!(error = %e, "broker accept failed"),
                },
            }
        }

        self.core.shutdown();
        info!(addr = ?addr, "broker stopped");
    }
}

async fn serve_connection(stream: TcpStream, core: LocalBroker) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let client_id = match lines.next_line().await {
        Ok(Some(line)) => match serde_json::from_str::<Frame>(&line) {
            Ok(Frame::Connect { client_id }) => client_id,
            Ok(other) => {
                warn!(frame = ?other, "first frame must be connect, closing");
                return;
            }
            Err(e) => {
                warn!(error = %e, "undecodable connect frame, closing");
                return;
            }
        },
        _ => return,
    };

    let (session, mut inbound) = match core.open_session(&client_id) {
        Ok(opened) => opened,
        Err(e) => {
            warn!(client = %client_id, error = %e, "refusing connection");
            return;
        }
    };

    let (acks, mut acks_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                packet = inbound.recv() => match packet {
                    Some(packet) => Frame::Deliver {
                        topic: packet.topic,
                        payload: packet.payload,
                    },
                    None => break,
                },
                filter = acks_rx.recv() => match filter {
                    Some(filter) => Frame::Subscribed { filter },
                    None => break,
                },
            };
            let Ok(line) = frame.to_line() else { continue };
            if write.write_all(&line).await.is_err() {
                break;
            }
        }
    });

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(client = %client_id, error = %e, "broker read failed");
                break;
            }
        };
        match serde_json::from_str::<Frame>(&line) {
            Ok(Frame::Subscribe { filter }) => {
                if core.add_filter(session, &filter).is_err() {
                    break;
                }
                let _ = acks.send(filter);
            }
            Ok(Frame::Publish { topic, payload }) => {
                core.route(Packet { topic, payload });
            }
            Ok(other) => warn!(client = %client_id, frame = ?other, "unexpected frame"),
            Err(e) => warn!(client = %client_id, error = %e, "dropping undecodable frame"),
        }
    }

    core.close_session(session);
    writer.abort();
    debug!(client = %client_id, "broker connection closed");
}

/// Connects to a [`TcpBroker`].
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
}

impl TcpConnector {
    /// Creates a connector for `host:port`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, client_id: &str) -> Result<Connection, BrokerError> {
        let stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|source| BrokerError::Unreachable {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        let (read, mut write) = stream.into_split();

        let hello = Frame::Connect {
            client_id: client_id.to_string(),
        };
        write.write_all(&hello.to_line()?).await?;

        let (tx, inbound) = mpsc::unbounded_channel();
        let acks = Arc::new(Mutex::new(PendingAcks::default()));
        let reader_acks = Arc::clone(&acks);
        let reader_client = client_id.to_string();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<Frame>(&line) {
                    Ok(Frame::Deliver { topic, payload }) => {
                        if tx.send(Packet { topic, payload }).is_err() {
                            break;
                        }
                    }
                    Ok(Frame::Subscribed { filter }) => {
                        if !reader_acks.lock().acknowledge() {
                            warn!(client = %reader_client, %filter, "unsolicited subscribe ack");
                        }
                    }
                    Ok(other) => warn!(client = %reader_client, frame = ?other, "unexpected frame"),
                    Err(e) => warn!(client = %reader_client, error = %e, "dropping undecodable frame"),
                }
            }
            reader_acks.lock().close();
        });

        Ok(Connection {
            link: Arc::new(TcpLink {
                writer: tokio::sync::Mutex::new(write),
                reader: Mutex::new(Some(reader)),
                acks,
                closed: AtomicBool::new(false),
            }),
            inbound,
        })
    }
}

/// Subscribers waiting for their `subscribed` frame, in send order.
#[derive(Debug, Default)]
struct PendingAcks {
    waiting: VecDeque<oneshot::Sender<()>>,
    closed: bool,
}

impl PendingAcks {
    fn register(&mut self, ack: oneshot::Sender<()>) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        self.waiting.push_back(ack);
        Ok(())
    }

    /// Releases the oldest waiter. False if nobody was waiting.
    fn acknowledge(&mut self) -> bool {
        match self.waiting.pop_front() {
            Some(ack) => {
                let _ = ack.send(());
                true
            }
            None => false,
        }
    }

    /// Fails every waiter and refuses new ones.
    fn close(&mut self) {
        self.closed = true;
        self.waiting.clear();
    }
}

#[derive(Debug)]
struct TcpLink {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reader: Mutex<Option<JoinHandle<()>>>,
    acks: Arc<Mutex<PendingAcks>>,
    closed: AtomicBool,
}

impl TcpLink {
    async fn send(&self, frame: Frame) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let line = frame.to_line()?;
        self.writer.lock().await.write_all(&line).await?;
        Ok(())
    }
}

#[async_trait]
impl Link for TcpLink {
    /// Resolves once the broker has acknowledged the filter.
    async fn subscribe(&self, filter: &str) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let line = Frame::Subscribe {
            filter: filter.to_string(),
        }
        .to_line()?;

        let (ack, acked) = oneshot::channel();
        {
            // Registration and write share the writer lock so acks arrive
            // in registration order.
            let mut writer = self.writer.lock().await;
            self.acks.lock().register(ack)?;
            writer.write_all(&line).await?;
        }
        acked.await.map_err(|_| BrokerError::Closed)
    }

    async fn publish(&self, packet: Packet) -> Result<(), BrokerError> {
        self.send(Frame::Publish {
            topic: packet.topic,
            payload: packet.payload,
        })
        .await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.acks.lock().close();
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn start_broker() -> (String, oneshot::Sender<()>) {
        let broker = TcpBroker::bind("127.0.0.1:0").await.unwrap();
        let addr = broker.local_addr().unwrap().to_string();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(broker.serve(async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx)
    }

    #[tokio::test]
    async fn publish_and_deliver_over_tcp() {
        let (addr, _stop) = start_broker().await;
        let connector = TcpConnector::new(&addr);

        let mut sub = connector.connect("sub").await.unwrap();
        sub.link.subscribe("digs/home/pub/#").await.unwrap();
        let publisher = connector.connect("pub").await.unwrap();
        publisher
            .link
            .publish(Packet::new("digs/home/pub/online", r#"{"clientId":"pub"}"#))
            .await
            .unwrap();

        let packet = tokio::time::timeout(Duration::from_secs(2), sub.inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(packet.topic, "digs/home/pub/online");
        assert_eq!(packet.payload, r#"{"clientId":"pub"}"#);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscribe_is_routable_once_acknowledged() {
        let (addr, _stop) = start_broker().await;
        let connector = TcpConnector::new(&addr);

        for n in 0..200 {
            let mut supervisor = connector.connect(&format!("w{n}")).await.unwrap();
            supervisor
                .link
                .subscribe(&format!("digs/home/w{n}-peon/#"))
                .await
                .unwrap();

            let peon = connector.connect(&format!("w{n}-peon")).await.unwrap();
            peon.link
                .publish(Packet::new(format!("digs/home/w{n}-peon/online"), "{}"))
                .await
                .unwrap();

            match tokio::time::timeout(Duration::from_secs(2), supervisor.inbound.recv()).await {
                Ok(Some(packet)) => assert_eq!(packet.topic, format!("digs/home/w{n}-peon/online")),
                other => panic!("online lost on iteration {n}: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn subscribe_on_closed_link_fails() {
        let (addr, _stop) = start_broker().await;
        let conn = TcpConnector::new(&addr).connect("c").await.unwrap();
        conn.link.close();
        assert!(matches!(
            conn.link.subscribe("a/b/c/#").await,
            Err(BrokerError::Closed)
        ));
    }

    #[tokio::test]
    async fn subscribe_after_broker_shutdown_fails() {
        let (addr, stop) = start_broker().await;
        let mut conn = TcpConnector::new(&addr).connect("c").await.unwrap();
        conn.link.subscribe("a/b/c/#").await.unwrap();
        stop.send(()).unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(2), conn.inbound.recv()).await;
        assert!(matches!(closed, Ok(None)));
        assert!(matches!(
            conn.link.subscribe("a/b/d/#").await,
            Err(BrokerError::Closed)
        ));
    }


    #[tokio::test]
    async fn unreachable_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        match TcpConnector::new(&addr).connect("x").await {
            Err(BrokerError::Unreachable { endpoint, .. }) => assert_eq!(endpoint, addr),
            other => panic!("expected Unreachable, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn broker_shutdown_closes_client_inbound() {
        let (addr, stop) = start_broker().await;
        let mut conn = TcpConnector::new(&addr).connect("c").await.unwrap();
        conn.link.subscribe("a/b/c/#").await.unwrap();
        stop.send(()).unwrap();

        let closed = tokio::time::timeout(Duration::from_secs(2), conn.inbound.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }

    #[tokio::test]
    async fn closed_link_rejects_publish() {
        let (addr, _stop) = start_broker().await;
        let conn = TcpConnector::new(&addr).connect("c").await.unwrap();
        conn.link.close();
        assert!(matches!(
            conn.link.publish(Packet::new("a/b/c/d", "1")).await,
            Err(BrokerError::Closed)
        ));
    }
}
