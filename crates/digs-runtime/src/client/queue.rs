//! FIFO request queue.
//!
//! Only the head of the queue is ever on the wire. Every state change
//! that removes the head hands back the next head's [`Outbound`] so the
//! caller can publish it after releasing the lock. Because a request is
//! handed out exactly once (when it becomes head), it is published
//! exactly once.
//!
//! ```text
//!   push(R1) -> Some(R1)      [R1]
//!   push(R2) -> None          [R1, R2]
//!   push(R3) -> None          [R1, R2, R3]
//!   complete(R1) -> Some(R2)  [R2, R3]
//!   abandon(R3) -> None       [R2]
//!   close() -> [R2]           []   (closed: further pushes fail)
//! ```
//!
//! A request can carry a head signal that fires when it is handed out,
//! which is when its caller's timeout starts.

use super::ClientError;
use digs_protocol::{Message, RequestId, Topic};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::trace;

pub(crate) type Reply = Result<Message, ClientError>;

/// A request waiting for its response.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub request_id: RequestId,
    pub topic: Topic,
    pub body: String,
    pub enqueued_at: Instant,
    reply: oneshot::Sender<Reply>,
    on_head: Option<oneshot::Sender<()>>,
}

impl PendingRequest {
    pub fn new(
        request_id: RequestId,
        topic: Topic,
        body: String,
        reply: oneshot::Sender<Reply>,
    ) -> Self {
        Self {
            request_id,
            topic,
            body,
            enqueued_at: Instant::now(),
            reply,
            on_head: None,
        }
    }

    /// Fires `signal` when this request becomes head.
    #[must_use]
    pub fn notify_on_head(mut self, signal: oneshot::Sender<()>) -> Self {
        self.on_head = Some(signal);
        self
    }

    fn promote(&mut self) -> Outbound {
        if let Some(signal) = self.on_head.take() {
            let _ = signal.send(());
        }
        Outbound {
            request_id: self.request_id,
            topic: self.topic.encode(),
            body: self.body.clone(),
        }
    }

    /// Delivers the outcome. A caller that stopped waiting is ignored.
    pub fn settle(self, outcome: Reply) {
        let _ = self.reply.send(outcome);
    }
}

/// A request that just became head and must be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outbound {
    pub request_id: RequestId,
    pub topic: String,
    pub body: String,
}

/// Result of trying to complete a request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The id was not at the head; nothing changed.
    NotHead,
    /// The head was settled; publish the new head if any.
    Advanced(Option<Outbound>),
}

#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    pending: VecDeque<PendingRequest>,
    closed: bool,
}

impl RequestQueue {
    /// Enqueues a request, returning it as [`Outbound`] if it became head.
    pub fn push(&mut self, mut request: PendingRequest) -> Result<Option<Outbound>, PendingRequest> {
        if self.closed {
            return Err(request);
        }
        let became_head = self.pending.is_empty();
        let outbound = became_head.then(|| request.promote());
        self.pending.push_back(request);
        Ok(outbound)
    }

    pub fn head_id(&self) -> Option<RequestId> {
        self.pending.front().map(|p| p.request_id)
    }

    /// Settles the head if it is `id`.
    pub fn complete(&mut self, id: RequestId, outcome: Reply) -> Completion {
        if self.head_id() != Some(id) {
            return Completion::NotHead;
        }
        if let Some(head) = self.pending.pop_front() {
            trace!(
                request = %id,
                elapsed_ms = head.enqueued_at.elapsed().as_millis() as u64,
                "request settled"
            );
            head.settle(outcome);
        }
        Completion::Advanced(self.pending.front_mut().map(PendingRequest::promote))
    }

    /// Removes `id` wherever it is, without settling it.
    ///
    /// Returns the new head's [`Outbound`] if `id` was the head.
    pub fn abandon(&mut self, id: RequestId) -> Option<Outbound> {
        let position = self.pending.iter().position(|p| p.request_id == id)?;
        self.pending.remove(position);
        if position == 0 {
            self.pending.front_mut().map(PendingRequest::promote)
        } else {
            None
        }
    }

    /// Closes the queue and drains every pending request.
    pub fn close(&mut self) -> Vec<PendingRequest> {
        self.closed = true;
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
