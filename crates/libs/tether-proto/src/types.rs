use std::fmt;
use std::str::FromStr;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

// ── Identifiers ───────────────────────────────────────────────────────────────

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of one physical link. Unique per link, never reused by the transport.
    ConnectionId
);

string_id!(
    /// Application-level user owning zero or more connections.
    UserId
);

string_id!(
    /// Opaque token linking an issued call to its eventual reply.
    CorrelationId
);

string_id!(
    /// Opaque pointer to an offloaded reply in a [`BlobStore`](crate::BlobStore).
    BlobReference
);

/// Byte length of freshly minted correlation ids (hex encoded on the wire).
pub const CORRELATION_ID_LEN: usize = 16;

impl CorrelationId {
    /// Mint a random id from the OS RNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; CORRELATION_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }
}

// ── Call ids ──────────────────────────────────────────────────────────────────

/// Separator between the base id and the target connection in the wire form.
pub const CALL_ID_SEPARATOR: char = ':';

/// Id carried by an invocation and echoed back by the reply.
///
/// Single-target and first-reply-wins calls use the bare base id. Streaming
/// fan-out gives every target its own id (`base:connection`) so replies can be
/// demultiplexed without a side channel. Inside the engine the two halves are
/// kept apart; the delimited string only exists for transports that need one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId {
    pub base: CorrelationId,
    pub target: Option<ConnectionId>,
}

impl CallId {
    pub fn single(base: CorrelationId) -> Self {
        Self { base, target: None }
    }

    pub fn for_target(base: CorrelationId, target: ConnectionId) -> Self {
        Self { base, target: Some(target) }
    }

    pub fn is_streaming(&self) -> bool {
        self.target.is_some()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}{}{}", self.base, CALL_ID_SEPARATOR, target),
            None => write!(f, "{}", self.base),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallIdParseError {
    #[error("call id is empty")]
    Empty,
    #[error("call id '{0}' has an empty target")]
    EmptyTarget(String),
}

impl FromStr for CallId {
    type Err = CallIdParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        // Base ids never contain the separator; the target may.
        match value.split_once(CALL_ID_SEPARATOR) {
            Some(("", _)) => Err(CallIdParseError::Empty),
            Some((_, "")) => Err(CallIdParseError::EmptyTarget(value.to_string())),
            Some((base, target)) => Ok(Self::for_target(base.into(), target.into())),
            None if value.is_empty() => Err(CallIdParseError::Empty),
            None => Ok(Self::single(value.into())),
        }
    }
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// Message pushed to a target asking it to run `method`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub call_id: CallId,
    pub method: String,
    /// MessagePack-encoded argument.
    #[serde(with = "serde_bytes")]
    pub argument: Vec<u8>,
}

/// Reply sent back by a target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReplyEnvelope {
    Empty,
    Inline {
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },
    Offloaded {
        reference: BlobReference,
        size_bytes: u64,
    },
    Fault {
        message: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Empty,
    Inline,
    Offloaded,
    Fault,
}

impl ReplyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Inline => "inline",
            Self::Offloaded => "offloaded",
            Self::Fault => "fault",
        }
    }
}

impl ReplyEnvelope {
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault { message: message.into() }
    }

    pub fn kind(&self) -> ReplyKind {
        match self {
            Self::Empty => ReplyKind::Empty,
            Self::Inline { .. } => ReplyKind::Inline,
            Self::Offloaded { .. } => ReplyKind::Offloaded,
            Self::Fault { .. } => ReplyKind::Fault,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }
}

/// Metadata of a reply written to a blob store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadedBlob {
    pub reference: BlobReference,
    pub size_bytes: u64,
    /// Unix epoch milliseconds.
    pub created_at_ms: u64,
}
