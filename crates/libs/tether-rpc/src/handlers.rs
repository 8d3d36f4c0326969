//! Client-side responder: method name → handler table.
//!
//! Handlers are registered by name at startup. [`MethodTable::dispatch`]
//! decodes the argument, runs the handler and turns its outcome into a
//! [`ReplyEnvelope`] through the table's [`PayloadPolicy`], so large results
//! are offloaded the same way on every client.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tether_proto::codec::{decode_payload, encode_payload};
use tether_proto::{InvocationEnvelope, ReplyEnvelope};

use crate::payload::PayloadPolicy;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, HandlerFailure>> + Send>>;
type Handler = Arc<dyn Fn(Vec<u8>) -> HandlerFuture + Send + Sync>;

enum HandlerFailure {
    InvalidArgument(String),
    Failed(String),
    Encode(String),
}

#[derive(Default)]
pub struct MethodTable {
    handlers: BTreeMap<String, Handler>,
    policy: PayloadPolicy,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: PayloadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register `handler` under `method`, replacing any earlier registration.
    /// An `Err` from the handler is sent back as a fault with that message.
    pub fn register<A, R, F, Fut>(&mut self, method: &str, handler: F) -> &mut Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, String>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: Handler = Arc::new(move |argument: Vec<u8>| {
            Box::pin(run_handler(Arc::clone(&handler), argument)) as HandlerFuture
        });
        if self.handlers.insert(method.to_string(), erased).is_some() {
            log::debug!("methods: replaced handler for {}", method);
        }
        self
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub async fn dispatch(&self, invocation: &InvocationEnvelope) -> ReplyEnvelope {
        let Some(handler) = self.handlers.get(&invocation.method) else {
            log::debug!("methods: no handler for {} (call {})", invocation.method, invocation.call_id);
            return ReplyEnvelope::fault(format!("unknown method: {}", invocation.method));
        };
        match handler(invocation.argument.clone()).await {
            Ok(bytes) => self.policy.produce_from_bytes(bytes).await,
            Err(HandlerFailure::InvalidArgument(err)) => {
                ReplyEnvelope::fault(format!("invalid argument for {}: {err}", invocation.method))
            }
            Err(HandlerFailure::Failed(message)) => ReplyEnvelope::fault(message),
            Err(HandlerFailure::Encode(err)) => ReplyEnvelope::fault(format!("serialization failed: {err}")),
        }
    }
}

async fn run_handler<A, R, F, Fut>(handler: Arc<F>, argument: Vec<u8>) -> Result<Vec<u8>, HandlerFailure>
where
    A: DeserializeOwned,
    R: Serialize,
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<R, String>>,
{
    let argument: A =
        decode_payload(&argument).map_err(|err| HandlerFailure::InvalidArgument(err.to_string()))?;
    let value = (*handler)(argument).await.map_err(HandlerFailure::Failed)?;
    encode_payload(&value).map_err(|err| HandlerFailure::Encode(err.to_string()))
}
