//! Boundary types and traits for tether remote calls.
//!
//! A push transport lets a server message its connected clients but gives the
//! clients no way to return a result. This crate defines the contract that the
//! correlation engine (`tether-rpc`) and a concrete transport agree on:
//!
//! - **Identifiers**: [`ConnectionId`], [`UserId`], [`CorrelationId`] and the
//!   structured [`CallId`] that rides on every invocation
//! - **Envelopes**: [`InvocationEnvelope`] going out, [`ReplyEnvelope`] coming back
//! - **Async traits**: [`TransportAdapter`] and [`BlobStore`], plus the
//!   synchronous inbound hook [`ReplyHandler`]
//! - **Errors**: [`InvokeError`] for call outcomes, [`TransportError`] and
//!   [`BlobError`] for the collaborators
//! - **Stubs**: [`NullTransport`] and [`NullBlobStore`] that refuse everything
//!
//! # Wire form of call ids
//!
//! ```text
//! single call:     3f9a...c1
//! streaming call:  3f9a...c1:conn-42
//! ```
//!
//! ```rust
//! use tether_proto::{CallId, ConnectionId, CorrelationId};
//!
//! let call = CallId::for_target(CorrelationId::new("3f9a"), ConnectionId::new("conn-42"));
//! let wire = call.to_string();
//! assert_eq!(wire, "3f9a:conn-42");
//! assert_eq!(wire.parse::<CallId>().unwrap(), call);
//! ```

pub mod codec;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{BlobError, InvokeError, TransportError};
pub use traits::{BlobStore, ReplyHandler, TransportAdapter};
pub use types::*;

mod stub;
pub use stub::{NullBlobStore, NullTransport};
