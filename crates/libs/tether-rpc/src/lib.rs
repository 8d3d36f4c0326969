//! Request/response correlation over a one-way push transport.
//!
//! A server that can push messages to connected clients uses this crate to
//! call methods on them and await typed results:
//!
//! - [`ConnectionRegistry`] tracks which links are up and which user owns them
//! - [`ResponseManager`] pairs replies with waiting callers by correlation id
//! - [`PayloadPolicy`] sends small replies inline and offloads large ones to a
//!   [`BlobStore`](tether_proto::BlobStore)
//! - [`InvocationGateway`] is the public call surface: admission control,
//!   deadlines, cancellation and single-reply or streaming fan-out calls
//! - [`MethodTable`] is the client-side counterpart that answers invocations
//! - [`LoopbackTransport`] simulates clients in-process
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_proto::{ConnectionId, UserId};
//! use tether_rpc::{ConnectionRegistry, GatewayConfig, InvocationGateway, LoopbackTransport, MethodTable};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(ConnectionRegistry::new());
//! let transport = Arc::new(LoopbackTransport::new(registry.clone()));
//! let gateway = InvocationGateway::new(GatewayConfig::default(), registry, transport.clone())?;
//!
//! let mut methods = MethodTable::new();
//! methods.register("Ping", |_: ()| async move { Ok("pong") });
//! transport.connect(ConnectionId::new("conn-1"), UserId::new("alice"), None, Arc::new(methods));
//!
//! let reply: String = gateway.invoke_user(&UserId::new("alice"), "Ping", &()).await?;
//! assert_eq!(reply, "pong");
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod config;
pub mod diagnostics;
pub mod gateway;
pub mod handlers;
mod helpers;
pub mod loopback;
pub mod payload;
pub mod reconcile;
pub mod registry;
pub mod response;
pub mod stream;

pub use blob::{FileBlobStore, MemoryBlobStore};
pub use config::{ConfigError, GatewayConfig};
pub use diagnostics::{Diagnostics, GatewayStatus};
pub use gateway::{
    CallOptions, CorrelationIdSource, InvocationGateway, RandomCorrelationIds, SequentialCorrelationIds,
    Target,
};
pub use handlers::MethodTable;
pub use loopback::{LinkBehavior, LoopbackTransport};
pub use payload::PayloadPolicy;
pub use reconcile::{reconcile_liveness, LivenessProbe, ReconcileReport};
pub use registry::{Connection, ConnectionDirectory, ConnectionRegistry};
pub use response::{Registration, ResponseManager, TargetReply};
pub use stream::{ReplyStream, TargetResult};
pub use tokio_util::sync::CancellationToken;
