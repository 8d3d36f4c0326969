//! Pending and streaming call tables.
//!
//! This is the only mutable state shared between the transport's inbound path
//! and callers awaiting replies. The inbound side ([`ResponseManager::resolve_single`],
//! [`ResponseManager::append_streaming`]) holds a table lock just long enough to
//! look up and hand over the envelope; it never awaits.
//!
//! ```text
//! register_single(id) ──► oneshot waiter ◄── resolve_single(id, reply)   (first wins)
//! register_streaming(id, n) ──► unbounded queue ◄── append_streaming(id, conn, reply)
//!                                                   closes itself after n replies
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tether_proto::{CallId, ConnectionId, CorrelationId, ReplyEnvelope, ReplyHandler};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Receiving half handed to a single-reply caller.
pub type ReplyWaiter = oneshot::Receiver<ReplyEnvelope>;

/// Receiving half handed to a streaming caller.
pub type ReplyQueue = mpsc::UnboundedReceiver<TargetReply>;

/// A reply tagged with its source and arrival time.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetReply {
    pub connection_id: ConnectionId,
    pub envelope: ReplyEnvelope,
    pub received_at: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("correlation id already registered: {0}")]
pub struct DuplicateCorrelationId(pub CorrelationId);

struct PendingCall {
    sender: oneshot::Sender<ReplyEnvelope>,
    registered_at: Instant,
}

struct StreamingCall {
    expected: usize,
    received: usize,
    // `None` once the call is complete; dropping the sender closes the queue.
    sender: Option<mpsc::UnboundedSender<TargetReply>>,
    sources: HashSet<ConnectionId>,
    registered_at: Instant,
}

/// Progress snapshot of a streaming call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamingProgress {
    pub expected: usize,
    pub received: usize,
    pub completed: bool,
}

#[derive(Default)]
pub struct ResponseManager {
    pending: Mutex<HashMap<CorrelationId, PendingCall>>,
    streaming: Mutex<HashMap<CorrelationId, StreamingCall>>,
}

impl ResponseManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_single(&self, id: &CorrelationId) -> Result<ReplyWaiter, DuplicateCorrelationId> {
        let mut pending = self.pending.lock().expect("pending mutex poisoned");
        let streaming = self.streaming.lock().expect("streaming mutex poisoned");
        if pending.contains_key(id) || streaming.contains_key(id) {
            return Err(DuplicateCorrelationId(id.clone()));
        }
        let (sender, waiter) = oneshot::channel();
        pending.insert(id.clone(), PendingCall { sender, registered_at: Instant::now() });
        Ok(waiter)
    }

    /// Register a fan-out expecting `expected` replies. Zero yields a queue that
    /// is already closed.
    pub fn register_streaming(
        &self,
        id: &CorrelationId,
        expected: usize,
    ) -> Result<ReplyQueue, DuplicateCorrelationId> {
        let pending = self.pending.lock().expect("pending mutex poisoned");
        let mut streaming = self.streaming.lock().expect("streaming mutex poisoned");
        if pending.contains_key(id) || streaming.contains_key(id) {
            return Err(DuplicateCorrelationId(id.clone()));
        }
        let (sender, queue) = mpsc::unbounded_channel();
        let sender = (expected > 0).then_some(sender);
        streaming.insert(
            id.clone(),
            StreamingCall {
                expected,
                received: 0,
                sender,
                sources: HashSet::new(),
                registered_at: Instant::now(),
            },
        );
        Ok(queue)
    }

    /// Hand `envelope` to the waiter for `id`. Only the first call for an id
    /// succeeds; unknown or already-resolved ids return `false`.
    pub fn resolve_single(&self, id: &CorrelationId, envelope: ReplyEnvelope) -> bool {
        let call = self.pending.lock().expect("pending mutex poisoned").remove(id);
        let Some(call) = call else {
            log::debug!("responses: dropping {} reply for unknown call {}", envelope.kind().as_str(), id);
            return false;
        };
        if call.sender.send(envelope).is_err() {
            log::debug!(
                "responses: caller for {} went away after {:?}",
                id,
                call.registered_at.elapsed()
            );
            return false;
        }
        true
    }

    /// Append one target's reply to a streaming call.
    ///
    /// Returns `false` for unknown or completed calls and for a second reply
    /// from the same connection.
    pub fn append_streaming(
        &self,
        id: &CorrelationId,
        from: &ConnectionId,
        envelope: ReplyEnvelope,
    ) -> bool {
        let mut streaming = self.streaming.lock().expect("streaming mutex poisoned");
        let Some(call) = streaming.get_mut(id) else {
            log::debug!("responses: dropping reply from {} for unknown stream {}", from, id);
            return false;
        };
        let Some(sender) = call.sender.as_ref() else {
            log::debug!("responses: stream {} already complete, dropping reply from {}", id, from);
            return false;
        };
        if call.sources.contains(from) {
            log::debug!("responses: duplicate reply from {} for stream {}", from, id);
            return false;
        }
        let reply = TargetReply { connection_id: from.clone(), envelope, received_at: Instant::now() };
        if sender.send(reply).is_err() {
            log::debug!("responses: consumer of stream {} went away", id);
            call.sender = None;
            return false;
        }
        call.sources.insert(from.clone());
        call.received += 1;
        if call.received >= call.expected {
            call.sender = None;
            log::debug!(
                "responses: stream {} complete with {} replies after {:?}",
                id,
                call.received,
                call.registered_at.elapsed()
            );
        }
        true
    }

    /// Close a streaming call's queue early. Items already queued stay readable.
    pub fn close_streaming(&self, id: &CorrelationId) {
        if let Some(call) = self.streaming.lock().expect("streaming mutex poisoned").get_mut(id) {
            call.sender = None;
        }
    }

    /// Forget `id` in both tables.
    pub fn remove(&self, id: &CorrelationId) {
        self.pending.lock().expect("pending mutex poisoned").remove(id);
        self.streaming.lock().expect("streaming mutex poisoned").remove(id);
    }

    pub fn streaming_progress(&self, id: &CorrelationId) -> Option<StreamingProgress> {
        self.streaming.lock().expect("streaming mutex poisoned").get(id).map(|call| {
            StreamingProgress {
                expected: call.expected,
                received: call.received,
                completed: call.sender.is_none(),
            }
        })
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending mutex poisoned").len()
    }

    pub fn streaming_len(&self) -> usize {
        self.streaming.lock().expect("streaming mutex poisoned").len()
    }
}

impl ReplyHandler for ResponseManager {
    fn on_reply_received(
        &self,
        call_id: CallId,
        connection_id: ConnectionId,
        envelope: ReplyEnvelope,
    ) {
        match call_id.target {
            None => {
                self.resolve_single(&call_id.base, envelope);
            }
            Some(target) => {
                if target != connection_id {
                    log::warn!(
                        "responses: reply for target {} arrived on connection {}",
                        target,
                        connection_id
                    );
                }
                self.append_streaming(&call_id.base, &target, envelope);
            }
        }
    }
}

/// Removes its id from the tables when dropped, whatever the call's outcome.
pub struct Registration {
    responses: Arc<ResponseManager>,
    id: CorrelationId,
}

impl Registration {
    pub fn new(responses: Arc<ResponseManager>, id: CorrelationId) -> Self {
        Self { responses, id }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn close_streaming(&self) {
        self.responses.close_streaming(&self.id);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.responses.remove(&self.id);
    }
}
