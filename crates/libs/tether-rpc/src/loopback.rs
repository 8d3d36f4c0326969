//! In-process [`TransportAdapter`] with simulated clients.
//!
//! Each simulated link owns a [`MethodTable`]. Invocations and replies pass
//! through the frame codec on the way, so anything that would not survive a
//! real wire fails here too. Links can be told to misbehave for tests and the
//! diagnostic harness.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tether_proto::codec::{decode_frame, encode_frame, DEFAULT_MAX_FRAME_LEN};
use tether_proto::{
    CallId, ConnectionId, InvocationEnvelope, ReplyEnvelope, ReplyHandler, TransportAdapter,
    TransportError, UserId,
};

use crate::handlers::MethodTable;
use crate::registry::{Connection, ConnectionDirectory};

/// How a simulated link treats invocations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkBehavior {
    /// Dispatches and replies before the send returns.
    #[default]
    Responsive,
    /// The send itself fails.
    RefuseSends,
    /// Accepts the invocation and never replies.
    Silent,
    /// Replies from a background task after the delay.
    Delayed(Duration),
    /// The send never completes, like a hung peer behind a full socket.
    Stalled,
}

struct LoopbackLink {
    methods: Arc<MethodTable>,
    behavior: LinkBehavior,
}

pub struct LoopbackTransport {
    directory: Arc<dyn ConnectionDirectory>,
    links: RwLock<HashMap<ConnectionId, LoopbackLink>>,
    handler: OnceLock<Arc<dyn ReplyHandler>>,
    sent: AtomicU64,
    max_frame_len: usize,
}

impl LoopbackTransport {
    pub fn new(directory: Arc<dyn ConnectionDirectory>) -> Self {
        Self {
            directory,
            links: RwLock::new(HashMap::new()),
            handler: OnceLock::new(),
            sent: AtomicU64::new(0),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Frame body limit for invocations and replies in both directions.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Link up: record the connection and start answering with `methods`.
    pub fn connect(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: Option<String>,
        methods: Arc<MethodTable>,
    ) -> Connection {
        self.links
            .write()
            .expect("links rwlock poisoned")
            .insert(connection_id.clone(), LoopbackLink { methods, behavior: LinkBehavior::default() });
        let connection = self.directory.add_connection(connection_id, user_id, display_name);
        log::info!("loopback: {} up for {}", connection.connection_id, connection.user_id);
        connection
    }

    /// Orderly link down.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        let had_link = self.links.write().expect("links rwlock poisoned").remove(connection_id).is_some();
        let was_registered = self.directory.remove_connection(connection_id);
        if had_link || was_registered {
            log::info!("loopback: {} down", connection_id);
        }
        had_link || was_registered
    }

    /// Abrupt loss: the link disappears but the directory is not told, as
    /// when a process dies without a clean disconnect.
    pub fn drop_link(&self, connection_id: &ConnectionId) -> bool {
        self.links.write().expect("links rwlock poisoned").remove(connection_id).is_some()
    }

    pub fn set_behavior(&self, connection_id: &ConnectionId, behavior: LinkBehavior) -> bool {
        match self.links.write().expect("links rwlock poisoned").get_mut(connection_id) {
            Some(link) => {
                link.behavior = behavior;
                true
            }
            None => false,
        }
    }

    /// Invocations accepted so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    async fn fan_out(
        &self,
        targets: BTreeSet<ConnectionId>,
        envelope: &InvocationEnvelope,
        description: &str,
    ) -> Result<(), TransportError> {
        let mut last_error = None;
        let mut delivered = 0usize;
        for target in &targets {
            match self.send_to_connection(target, envelope).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    log::debug!("loopback: {} skipped for {}: {}", target, description, err);
                    last_error = Some(err);
                }
            }
        }
        if delivered > 0 {
            return Ok(());
        }
        Err(last_error.unwrap_or_else(|| TransportError::Closed(format!("no live connections for {description}"))))
    }

    fn reply_handler(&self) -> Option<Arc<dyn ReplyHandler>> {
        self.handler.get().cloned()
    }
}

/// Frame the reply like a real client would and hand it to the handler.
fn return_reply(
    handler: Option<Arc<dyn ReplyHandler>>,
    connection_id: ConnectionId,
    call_id: CallId,
    reply: ReplyEnvelope,
    max_frame_len: usize,
) {
    let Some(handler) = handler else {
        log::warn!("loopback: reply for {} dropped, no reply handler registered", call_id);
        return;
    };
    let framed = encode_frame(&reply, max_frame_len)
        .and_then(|frame| decode_frame::<ReplyEnvelope>(&frame, max_frame_len));
    let reply = match framed {
        Ok(reply) => reply,
        Err(err) => {
            log::warn!("loopback: reply for {} did not survive framing: {}", call_id, err);
            return;
        }
    };
    handler.on_reply_received(call_id, connection_id, reply);
}

#[async_trait]
impl TransportAdapter for LoopbackTransport {
    async fn send_to_connection(
        &self,
        connection_id: &ConnectionId,
        envelope: &InvocationEnvelope,
    ) -> Result<(), TransportError> {
        let (methods, behavior) = {
            let links = self.links.read().expect("links rwlock poisoned");
            let link = links
                .get(connection_id)
                .ok_or_else(|| TransportError::UnknownConnection(connection_id.clone()))?;
            (Arc::clone(&link.methods), link.behavior)
        };
        match behavior {
            LinkBehavior::RefuseSends => {
                return Err(TransportError::Closed(format!("{connection_id} refused delivery")));
            }
            LinkBehavior::Stalled => {
                log::debug!("loopback: {} stalled on {}", connection_id, envelope.call_id);
                return std::future::pending().await;
            }
            _ => {}
        }

        let max_frame_len = self.max_frame_len;
        let frame =
            encode_frame(envelope, max_frame_len).map_err(|err| TransportError::Encode(err.to_string()))?;
        let invocation: InvocationEnvelope =
            decode_frame(&frame, max_frame_len).map_err(|err| TransportError::Io(err.to_string()))?;
        self.sent.fetch_add(1, Ordering::Relaxed);

        match behavior {
            LinkBehavior::Silent => {
                log::debug!("loopback: {} swallowed {}", connection_id, invocation.call_id);
            }
            LinkBehavior::Delayed(delay) => {
                let handler = self.reply_handler();
                let connection_id = connection_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let reply = methods.dispatch(&invocation).await;
                    return_reply(handler, connection_id, invocation.call_id, reply, max_frame_len);
                });
            }
            LinkBehavior::Responsive | LinkBehavior::RefuseSends | LinkBehavior::Stalled => {
                let reply = methods.dispatch(&invocation).await;
                return_reply(self.reply_handler(), connection_id.clone(), invocation.call_id, reply, max_frame_len);
            }
        }
        Ok(())
    }

    async fn send_to_user(
        &self,
        user_id: &UserId,
        envelope: &InvocationEnvelope,
    ) -> Result<(), TransportError> {
        let targets = self.directory.connections_of(user_id);
        self.fan_out(targets, envelope, &format!("user {user_id}")).await
    }

    async fn send_to_users(
        &self,
        user_ids: &[UserId],
        envelope: &InvocationEnvelope,
    ) -> Result<(), TransportError> {
        let targets: BTreeSet<ConnectionId> =
            user_ids.iter().flat_map(|user_id| self.directory.connections_of(user_id)).collect();
        self.fan_out(targets, envelope, &format!("{} user(s)", user_ids.len())).await
    }

    async fn send_to_all(&self, envelope: &InvocationEnvelope) -> Result<(), TransportError> {
        let targets: BTreeSet<ConnectionId> = self.directory.connection_ids().into_iter().collect();
        self.fan_out(targets, envelope, "all connections").await
    }

    fn register_reply_handler(&self, handler: Arc<dyn ReplyHandler>) {
        if self.handler.set(handler).is_err() {
            log::warn!("loopback: reply handler already registered, ignoring");
        }
    }
}
