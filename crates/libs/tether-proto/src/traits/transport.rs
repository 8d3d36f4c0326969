use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::*;

/// Inbound hook the transport calls for every reply it receives.
///
/// Implementations must return promptly without awaiting anything: the
/// transport calls this from its receive path and concurrent replies from
/// other targets queue behind it.
pub trait ReplyHandler: Send + Sync {
    fn on_reply_received(
        &self,
        call_id: CallId,
        connection_id: ConnectionId,
        envelope: ReplyEnvelope,
    );
}

/// Send side of a server-initiated push transport.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Deliver to one physical connection.
    async fn send_to_connection(
        &self,
        connection_id: &ConnectionId,
        envelope: &InvocationEnvelope,
    ) -> Result<(), TransportError>;

    /// Deliver to every connection of a user.
    async fn send_to_user(
        &self,
        user_id: &UserId,
        envelope: &InvocationEnvelope,
    ) -> Result<(), TransportError>;

    /// Deliver to every connection of every listed user.
    async fn send_to_users(
        &self,
        user_ids: &[UserId],
        envelope: &InvocationEnvelope,
    ) -> Result<(), TransportError>;

    /// Deliver to every live connection.
    async fn send_to_all(&self, envelope: &InvocationEnvelope) -> Result<(), TransportError>;

    /// Install the inbound reply hook. Called once at startup.
    fn register_reply_handler(&self, handler: Arc<dyn ReplyHandler>);
}
