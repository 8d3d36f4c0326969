//! Public call surface: admission, correlation, delivery, deadlines, decoding.
//!
//! ```text
//! invoke(target, method, arg)
//!   ├─ resolve target        zero live connections → NotConnected (nothing sent)
//!   ├─ admission slot        bounded wait          → CapacityExceeded
//!   ├─ mint id + register    collision             → DuplicateCorrelationId (error log)
//!   ├─ send, await reply     send refused          → Transport / NotConnected
//!   │                        deadline or cancel    → Timeout
//!   └─ release slot, decode  blob read past deadline → BlobUnavailable
//! ```
//!
//! The deadline starts once the call is admitted and covers the send, the
//! wait for the reply and any blob read. Streaming calls send to every target
//! concurrently; sends still outstanding at the deadline are abandoned and
//! those targets show up as missing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tether_proto::codec::encode_payload;
use tether_proto::{
    BlobStore, CallId, ConnectionId, CorrelationId, InvocationEnvelope, InvokeError, ReplyEnvelope,
    TransportAdapter, UserId, CALL_ID_SEPARATOR,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, GatewayConfig};
use crate::helpers::cancelled;
use crate::payload::PayloadPolicy;
use crate::registry::ConnectionDirectory;
use crate::response::{DuplicateCorrelationId, Registration, ResponseManager};
use crate::stream::ReplyStream;

/// Where a single-reply call is delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Connection(ConnectionId),
    User(UserId),
    Users(Vec<UserId>),
    All,
}

impl Target {
    pub fn describe(&self) -> String {
        match self {
            Self::Connection(id) => format!("connection {id}"),
            Self::User(id) => format!("user {id}"),
            Self::Users(ids) => {
                let ids: Vec<&str> = ids.iter().map(UserId::as_str).collect();
                format!("users [{}]", ids.join(", "))
            }
            Self::All => "all connections".to_string(),
        }
    }
}

/// Per-call overrides.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Replaces the configured request timeout.
    pub timeout: Option<Duration>,
    /// Cancelling the token ends the call as if it had timed out.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Source of correlation ids. Ids must never contain [`CALL_ID_SEPARATOR`].
pub trait CorrelationIdSource: Send + Sync {
    fn next_id(&self) -> CorrelationId;
}

/// Random 128-bit ids. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCorrelationIds;

impl CorrelationIdSource for RandomCorrelationIds {
    fn next_id(&self) -> CorrelationId {
        CorrelationId::random()
    }
}

/// `prefix-0`, `prefix-1`, ... Handy for readable logs in tests and tooling.
#[derive(Debug)]
pub struct SequentialCorrelationIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialCorrelationIds {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.replace(CALL_ID_SEPARATOR, "-"), next: AtomicU64::new(0) }
    }
}

impl CorrelationIdSource for SequentialCorrelationIds {
    fn next_id(&self) -> CorrelationId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        CorrelationId::new(format!("{}-{}", self.prefix, n))
    }
}

pub struct InvocationGateway {
    config: GatewayConfig,
    directory: Arc<dyn ConnectionDirectory>,
    responses: Arc<ResponseManager>,
    transport: Arc<dyn TransportAdapter>,
    policy: PayloadPolicy,
    admission: Arc<Semaphore>,
    ids: Arc<dyn CorrelationIdSource>,
}

impl InvocationGateway {
    /// Build a gateway and register its reply handler with `transport`.
    pub fn new(
        config: GatewayConfig,
        directory: Arc<dyn ConnectionDirectory>,
        transport: Arc<dyn TransportAdapter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let responses = Arc::new(ResponseManager::new());
        transport.register_reply_handler(responses.clone());
        log::info!(
            "gateway: ready (max_concurrent_calls={} request_timeout={:?} inline_threshold={}B)",
            config.max_concurrent_calls,
            config.request_timeout,
            config.inline_threshold_bytes
        );
        Ok(Self {
            policy: PayloadPolicy::from_config(&config, None),
            admission: Arc::new(Semaphore::new(config.max_concurrent_calls)),
            ids: Arc::new(RandomCorrelationIds),
            config,
            directory,
            responses,
            transport,
        })
    }

    /// Enables consuming offloaded replies.
    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.policy = PayloadPolicy::from_config(&self.config, Some(store));
        self
    }

    pub fn with_id_source(mut self, ids: Arc<dyn CorrelationIdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<dyn ConnectionDirectory> {
        &self.directory
    }

    pub fn responses(&self) -> &Arc<ResponseManager> {
        &self.responses
    }

    pub fn policy(&self) -> &PayloadPolicy {
        &self.policy
    }

    /// Admission slots currently held.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent_calls.saturating_sub(self.admission.available_permits())
    }

    pub async fn invoke_one<A, R>(
        &self,
        connection_id: &ConnectionId,
        method: &str,
        argument: &A,
    ) -> Result<R, InvokeError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke(Target::Connection(connection_id.clone()), method, argument, CallOptions::default())
            .await
    }

    /// First reply from any of the user's connections wins.
    pub async fn invoke_user<A, R>(&self, user_id: &UserId, method: &str, argument: &A) -> Result<R, InvokeError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke(Target::User(user_id.clone()), method, argument, CallOptions::default()).await
    }

    pub async fn invoke_users<A, R>(
        &self,
        user_ids: &[UserId],
        method: &str,
        argument: &A,
    ) -> Result<R, InvokeError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke(Target::Users(user_ids.to_vec()), method, argument, CallOptions::default()).await
    }

    pub async fn invoke_all<A, R>(&self, method: &str, argument: &A) -> Result<R, InvokeError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke(Target::All, method, argument, CallOptions::default()).await
    }

    /// Single-reply call to `target`. When the target spans several
    /// connections the first reply wins and later ones are dropped.
    pub async fn invoke<A, R>(
        &self,
        target: Target,
        method: &str,
        argument: &A,
        options: CallOptions,
    ) -> Result<R, InvokeError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.ensure_reachable(&target)?;
        let argument = encode_payload(argument).map_err(InvokeError::serialization)?;
        let permit = self.admit(method).await?;

        let id = self.ids.next_id();
        let waiter = self.responses.register_single(&id).map_err(|err| duplicate(method, err))?;
        let registration = Registration::new(Arc::clone(&self.responses), id.clone());
        let envelope =
            InvocationEnvelope { call_id: CallId::single(id), method: method.to_string(), argument };

        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        let exchange = async {
            self.deliver(&target, &envelope).await?;
            Ok::<_, InvokeError>(waiter.await.ok())
        };
        let reply = tokio::select! {
            outcome = exchange => outcome,
            _ = tokio::time::sleep_until(deadline) => Ok(None),
            _ = cancelled(options.cancel.as_ref()) => Ok(None),
        }?;
        drop(registration);
        drop(permit);

        match reply {
            Some(reply) => self.policy.consume_reply_before(reply, deadline).await,
            None => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                log::warn!(
                    "gateway: {} to {} gave up after {}ms (call {})",
                    method,
                    target.describe(),
                    elapsed_ms,
                    envelope.call_id
                );
                Err(InvokeError::Timeout { method: method.to_string(), elapsed_ms })
            }
        }
    }

    pub async fn invoke_many_streaming<A, R>(
        &self,
        connection_ids: &[ConnectionId],
        method: &str,
        argument: &A,
    ) -> Result<ReplyStream<R>, InvokeError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.invoke_many_streaming_with(connection_ids, method, argument, CallOptions::default()).await
    }

    /// Fan `method` out to each connection and stream back one result per
    /// target in arrival order. Duplicate ids in `connection_ids` are
    /// collapsed; an empty list yields an empty stream.
    ///
    /// Returns once every send has finished, or at the deadline or
    /// cancellation, whichever comes first.
    pub async fn invoke_many_streaming_with<A, R>(
        &self,
        connection_ids: &[ConnectionId],
        method: &str,
        argument: &A,
        options: CallOptions,
    ) -> Result<ReplyStream<R>, InvokeError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut targets: Vec<ConnectionId> = Vec::with_capacity(connection_ids.len());
        for id in connection_ids {
            if !targets.contains(id) {
                targets.push(id.clone());
            }
        }
        if targets.is_empty() {
            return Ok(ReplyStream::empty(method));
        }

        let argument = encode_payload(argument).map_err(InvokeError::serialization)?;
        let permit = self.admit(method).await?;
        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let deadline = Instant::now() + timeout;

        let base = self.ids.next_id();
        let queue =
            self.responses.register_streaming(&base, targets.len()).map_err(|err| duplicate(method, err))?;
        let registration = Registration::new(Arc::clone(&self.responses), base.clone());

        let mut sends = JoinSet::new();
        for target in &targets {
            let envelope = InvocationEnvelope {
                call_id: CallId::for_target(base.clone(), target.clone()),
                method: method.to_string(),
                argument: argument.clone(),
            };
            let transport = Arc::clone(&self.transport);
            let responses = Arc::clone(&self.responses);
            let base = base.clone();
            let target = target.clone();
            sends.spawn(async move {
                if let Err(err) = transport.send_to_connection(&target, &envelope).await {
                    log::warn!("gateway: {} send to {} failed: {}", envelope.method, target, err);
                    responses.append_streaming(&base, &target, ReplyEnvelope::fault(format!("send failed: {err}")));
                }
            });
        }

        let all_sent = async {
            while let Some(joined) = sends.join_next().await {
                if let Err(err) = joined {
                    log::error!("gateway: {} send task for {} failed: {}", method, base, err);
                }
            }
        };
        tokio::select! {
            _ = all_sent => {
                log::debug!("gateway: {} fanned out to {} target(s) as {}", method, targets.len(), base);
            }
            _ = tokio::time::sleep_until(deadline) => {
                log::warn!("gateway: {} fan-out {} still sending at the deadline", method, base);
            }
            _ = cancelled(options.cancel.as_ref()) => {
                log::debug!("gateway: {} fan-out {} cancelled while sending", method, base);
            }
        }
        sends.abort_all();

        Ok(ReplyStream::new(method, queue, registration, permit, targets, self.policy.clone())
            .with_deadline(deadline, options.cancel))
    }

    fn ensure_reachable(&self, target: &Target) -> Result<(), InvokeError> {
        let reachable = match target {
            Target::Connection(id) => self.directory.connection(id).is_some(),
            Target::User(user) => self.directory.is_user_connected(user),
            Target::Users(users) => users.iter().any(|user| self.directory.is_user_connected(user)),
            Target::All => self.directory.connection_count() > 0,
        };
        if reachable {
            Ok(())
        } else {
            log::debug!("gateway: {} has no live connections", target.describe());
            Err(InvokeError::not_connected(target.describe()))
        }
    }

    async fn admit(&self, method: &str) -> Result<OwnedSemaphorePermit, InvokeError> {
        let acquire = Arc::clone(&self.admission).acquire_owned();
        match tokio::time::timeout(self.config.admission_wait, acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => {
                log::warn!(
                    "gateway: {} not admitted within {:?} ({} calls in flight)",
                    method,
                    self.config.admission_wait,
                    self.in_flight()
                );
                Err(InvokeError::CapacityExceeded { max_concurrent: self.config.max_concurrent_calls })
            }
        }
    }

    async fn deliver(&self, target: &Target, envelope: &InvocationEnvelope) -> Result<(), InvokeError> {
        let sent = match target {
            Target::Connection(id) => self.transport.send_to_connection(id, envelope).await,
            Target::User(user) => self.transport.send_to_user(user, envelope).await,
            Target::Users(users) => self.transport.send_to_users(users, envelope).await,
            Target::All => self.transport.send_to_all(envelope).await,
        };
        sent.map_err(|err| {
            log::warn!("gateway: {} to {} not delivered: {}", envelope.method, target.describe(), err);
            InvokeError::from(err)
        })
    }
}

fn duplicate(method: &str, err: DuplicateCorrelationId) -> InvokeError {
    log::error!("gateway: {} aborted: {}", method, err);
    InvokeError::DuplicateCorrelationId { id: err.0.to_string() }
}
