//! Channel client.
//!
//! One [`ChannelClient`] owns one broker session. It publishes
//! messages under its own sender id, correlates requests with their
//! responses, and turns everything else that arrives into
//! [`ClientEvent`]s.
//!
//! # Requests
//!
//! Requests are strictly FIFO per client and only one is on the wire at
//! a time:
//!
//! ```text
//! request(A) ─► queue [A]      ─► publish A~req-1
//! request(B) ─► queue [A, B]       (waits)
//! response req-1 ─► resolve A ─► queue [B] ─► publish B~req-2
//! ```
//!
//! The queue advances once per resolution, whether that is a response,
//! a failed publish, a timeout, or the connection dropping.
//!
//! # Events
//!
//! The dispatch task forwards, in arrival order:
//!
//! | Incoming | Event |
//! |----------|-------|
//! | plain topic | [`ClientEvent::Message`] |
//! | request topic, id is our queue head | resolves the request (no event) |
//! | other request topic | [`ClientEvent::Request`] with a [`Responder`] |
//! | undecodable topic or body | [`ClientEvent::Malformed`] |
//! | connection lost | [`ClientEvent::Disconnected`] (once) |

mod error;
mod queue;

pub use error::ClientError;

use crate::broker::{Connector, Link, Packet};
use digs_protocol::{
    Message, Online, ProtocolError, RequestId, Topic, Wildcard, DEFAULT_NAMESPACE,
    DEFAULT_PROJECT,
};
use parking_lot::Mutex;
use queue::{Completion, Outbound, PendingRequest, RequestQueue};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream of events produced by a client's dispatch task.
pub type ClientEvents = mpsc::UnboundedReceiver<ClientEvent>;

/// Something that arrived on the channel and was not a response to us.
#[derive(Debug)]
pub enum ClientEvent {
    /// A plain publish.
    Message { topic: Topic, message: Message },
    /// A request addressed to whoever is listening.
    Request {
        topic: Topic,
        message: Message,
        responder: Responder,
    },
    /// A packet that could not be decoded. It was dropped.
    Malformed { topic: String, error: ProtocolError },
    /// The broker connection is gone. Sent once, last.
    Disconnected,
}

/// Configures and connects a [`ChannelClient`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    client_id: String,
    namespace: String,
    project: String,
    topics: Vec<Topic>,
    senders: Vec<String>,
    request_timeout: Option<Duration>,
}

impl ClientBuilder {
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Subscribes to `pattern` as soon as the session opens.
    #[must_use]
    pub fn subscribe(mut self, pattern: Topic) -> Self {
        self.topics.push(pattern);
        self
    }

    /// Subscribes to everything `sender` publishes in this client's scope.
    #[must_use]
    pub fn subscribe_to(mut self, sender: impl Into<String>) -> Self {
        self.senders.push(sender.into());
        self
    }

    /// Per-request timeout. `None` waits forever.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Opens the session, registers subscriptions and announces `online`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Broker`] if the broker cannot be reached. The
    ///   connection is not retried.
    /// - [`ClientError::Topic`] if a subscription pattern is invalid.
    pub async fn connect(
        self,
        connector: &dyn Connector,
    ) -> Result<(ChannelClient, ClientEvents), ClientError> {
        let mut patterns = self.topics;
        for sender in &self.senders {
            patterns.push(
                Topic::builder(&self.namespace, &self.project, sender)
                    .wildcard(Wildcard::Multi)
                    .build()?,
            );
        }

        let connection = connector.connect(&self.client_id).await?;
        for pattern in &patterns {
            connection.link.subscribe(&pattern.encode()).await?;
        }

        let inner = Arc::new(ClientInner {
            client_id: self.client_id,
            namespace: self.namespace,
            project: self.project,
            link: connection.link,
            queue: Mutex::new(RequestQueue::default()),
            sequence: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            request_timeout: self.request_timeout,
            dispatcher: Mutex::new(None),
        });

        let (events_tx, events) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::downgrade(&inner),
            connection.inbound,
            events_tx,
        ));
        *inner.dispatcher.lock() = Some(dispatcher);

        let client = ChannelClient { inner };
        client
            .publish(&Message::Online(Online {
                client_id: client.id().to_string(),
            }))
            .await?;
        debug!(client = %client.id(), subscriptions = patterns.len(), "client connected");
        Ok((client, events))
    }
}

/// A connected broker client. Cheap to clone.
///
/// Dropping the last handle ends the broker session.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    client_id: String,
    namespace: String,
    project: String,
    link: Arc<dyn Link>,
    queue: Mutex<RequestQueue>,
    sequence: AtomicU64,
    connected: AtomicBool,
    request_timeout: Option<Duration>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelClient {
    /// Starts configuring a client that will connect as `client_id`.
    pub fn builder(client_id: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            client_id: client_id.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            project: DEFAULT_PROJECT.to_string(),
            topics: Vec::new(),
            senders: Vec::new(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.client_id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Requests waiting for a response, including the one on the wire.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// A topic in this client's scope, sent by this client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Topic`] if `path` is not a valid path.
    pub fn topic_for(&self, path: &str) -> Result<Topic, ClientError> {
        Ok(
            Topic::builder(&self.inner.namespace, &self.inner.project, &self.inner.client_id)
                .path(path)
                .build()?,
        )
    }

    /// Registers interest in `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] after the session ended.
    pub async fn subscribe(&self, pattern: &Topic) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.inner.link.subscribe(&pattern.encode()).await?;
        Ok(())
    }

    /// Publishes `message` on its own path. Fire and forget.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Serialization`] if the body cannot be encoded.
    /// - [`ClientError::Disconnected`] or [`ClientError::Broker`] if the
    ///   session cannot carry it.
    pub async fn publish(&self, message: &Message) -> Result<(), ClientError> {
        let topic = self.topic_for(message.path())?;
        self.publish_on(&topic, message.encode()?).await
    }

    async fn publish_on(&self, topic: &Topic, body: String) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.inner
            .link
            .publish(Packet::new(topic.encode(), body))
            .await?;
        Ok(())
    }

    /// Sends `message` as a request and waits for the response.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Disconnected`] if the session is gone, now or
    ///   before the response arrives.
    /// - [`ClientError::Timeout`] if the client has a request timeout and
    ///   it elapses. The clock starts when the request reaches the head of
    ///   the queue and is published, not while it waits behind others.
    /// - [`ClientError::Broker`] if publishing the request failed.
    /// - [`ClientError::Protocol`] if the response body is malformed.
    pub async fn request(&self, message: Message) -> Result<Message, ClientError> {
        self.ensure_connected()?;

        let id = RequestId::new(self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        let topic =
            Topic::builder(&self.inner.namespace, &self.inner.project, &self.inner.client_id)
                .path(message.path())
                .request_id(id)
                .build()?;
        let body = message.encode()?;

        let (tx, rx) = oneshot::channel();
        let (head_tx, head_rx) = oneshot::channel();
        let pushed = self
            .inner
            .queue
            .lock()
            .push(PendingRequest::new(id, topic, body, tx).notify_on_head(head_tx));
        match pushed {
            Ok(Some(outbound)) => self.inner.send_outbound(outbound).await,
            Ok(None) => trace!(client = %self.id(), request = %id, "request queued"),
            Err(_) => return Err(ClientError::Disconnected),
        }

        let received = match self.inner.request_timeout {
            Some(limit) => match head_timeout(head_rx, limit, rx).await {
                Ok(received) => received,
                Err(()) => {
                    let next = self.inner.queue.lock().abandon(id);
                    if let Some(next) = next {
                        self.inner.send_outbound(next).await;
                    }
                    warn!(client = %self.id(), request = %id, "request timed out");
                    return Err(ClientError::Timeout {
                        request_id: id,
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            },
            None => rx.await,
        };
        received.map_err(|_| ClientError::Disconnected)?
    }

    /// Ends the session and rejects every pending request.
    ///
    /// Idempotent.
    pub fn disconnect(&self) {
        if self.inner.connected.swap(false, Ordering::AcqRel) {
            self.inner.reject_pending();
            self.inner.link.close();
            debug!(client = %self.id(), "client disconnected");
        }
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::Disconnected)
        }
    }
}

/// Waits for `reply`, allowing `limit` from the moment the request
/// became head.
async fn head_timeout<T>(
    became_head: oneshot::Receiver<()>,
    limit: Duration,
    reply: oneshot::Receiver<T>,
) -> Result<Result<T, oneshot::error::RecvError>, ()> {
    tokio::pin!(reply);
    tokio::select! {
        received = &mut reply => return Ok(received),
        signal = became_head => {
            // Dropped unsignalled: the request left the queue without
            // becoming head, so `reply` settles on its own.
            if signal.is_err() {
                return Ok(reply.await);
            }
        }
    }
    tokio::time::timeout(limit, reply).await.map_err(|_| ())
}

impl fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("ChannelClient")
            .field("id", &self.inner.client_id)
            .field("namespace", &self.inner.namespace)
            .field("project", &self.inner.project)
            .field("connected", &self.is_connected())
            .field("pending", &queue.len())
            .field("queue_closed", &queue.is_closed())
            .finish()
    }
}

impl ClientInner {
    /// Publishes a request that just became head.
    ///
    /// A failed publish settles that request with the broker error and
    /// moves on to the next one.
    async fn send_outbound(&self, outbound: Outbound) {
        let mut next = Some(outbound);
        while let Some(Outbound {
            request_id,
            topic,
            body,
        }) = next.take()
        {
            match self.link.publish(Packet::new(topic, body)).await {
                Ok(()) => trace!(client = %self.client_id, request = %request_id, "request sent"),
                Err(e) => {
                    warn!(client = %self.client_id, request = %request_id, error = %e, "request publish failed");
                    let completion = self.queue.lock().complete(request_id, Err(e.into()));
                    if let Completion::Advanced(following) = completion {
                        next = following;
                    }
                }
            }
        }
    }

    fn reject_pending(&self) {
        let drained = self.queue.lock().close();
        if !drained.is_empty() {
            debug!(client = %self.client_id, count = drained.len(), "rejecting pending requests");
        }
        for pending in drained {
            pending.settle(Err(ClientError::Disconnected));
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        self.link.close();
    }
}

async fn dispatch_loop(
    inner: Weak<ClientInner>,
    mut inbound: mpsc::UnboundedReceiver<Packet>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    while let Some(packet) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else { return };
        dispatch(&inner, packet, &events).await;
    }

    if let Some(inner) = inner.upgrade() {
        inner.connected.store(false, Ordering::Release);
        inner.reject_pending();
        debug!(client = %inner.client_id, "broker connection lost");
    }
    let _ = events.send(ClientEvent::Disconnected);
}

async fn dispatch(
    inner: &Arc<ClientInner>,
    packet: Packet,
    events: &mpsc::UnboundedSender<ClientEvent>,
) {
    let topic = match Topic::decode(&packet.topic) {
        Ok(topic) => topic,
        Err(e) => {
            warn!(client = %inner.client_id, topic = %packet.topic, error = %e, "dropping packet with bad topic");
            let _ = events.send(ClientEvent::Malformed {
                topic: packet.topic,
                error: e.into(),
            });
            return;
        }
    };
    let decoded = Message::decode(topic.path(), &packet.payload);

    if let Some(id) = topic.request_id() {
        let is_response = topic.sender_id() != inner.client_id
            && inner.queue.lock().head_id() == Some(id);
        if is_response {
            let completion = inner
                .queue
                .lock()
                .complete(id, decoded.map_err(ClientError::from));
            if let Completion::Advanced(Some(next)) = completion {
                inner.send_outbound(next).await;
            }
            return;
        }
    }

    let message = match decoded {
        Ok(message) => message,
        Err(error) => {
            warn!(client = %inner.client_id, topic = %packet.topic, error = %error, "dropping malformed message");
            let _ = events.send(ClientEvent::Malformed {
                topic: packet.topic,
                error,
            });
            return;
        }
    };

    let event = if topic.is_request() {
        ClientEvent::Request {
            responder: Responder {
                client: ChannelClient {
                    inner: Arc::clone(inner),
                },
                topic: topic.clone(),
            },
            topic,
            message,
        }
    } else {
        ClientEvent::Message { topic, message }
    };
    let _ = events.send(event);
}

/// Answers one incoming request.
#[derive(Debug)]
pub struct Responder {
    client: ChannelClient,
    topic: Topic,
}

impl Responder {
    /// The topic the request arrived on.
    #[must_use]
    pub fn request_topic(&self) -> &Topic {
        &self.topic
    }

    /// Publishes `message` as the response.
    ///
    /// The response keeps the request's path and id and carries this
    /// client's sender id.
    ///
    /// # Errors
    ///
    /// Same as [`ChannelClient::publish`].
    pub async fn reply(self, message: Message) -> Result<(), ClientError> {
        let topic = self.topic.update().sender(self.client.id()).build()?;
        self.client.publish_on(&topic, message.encode()?).await
    }

    /// Publishes a raw JSON value as the response.
    ///
    /// # Errors
    ///
    /// Same as [`ChannelClient::publish`].
    pub async fn reply_value(self, value: Value) -> Result<(), ClientError> {
        let name = self.topic.path().to_string();
        self.reply(Message::Command {
            name,
            payload: value,
        })
        .await
    }
}
