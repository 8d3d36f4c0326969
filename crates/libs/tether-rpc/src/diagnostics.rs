//! Read-only views and ad-hoc calls for operators.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tether_proto::{ConnectionId, InvokeError, UserId};
use tokio::time::Instant;

use crate::gateway::{CallOptions, InvocationGateway, Target};
use crate::registry::Connection;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub connected_users: usize,
    pub connections: usize,
    pub in_flight: usize,
    pub max_concurrent_calls: usize,
    pub pending_calls: usize,
    pub streaming_calls: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionListing {
    pub user_id: UserId,
    pub connections: Vec<Connection>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    Ok { value: serde_json::Value },
    Failed { error: String, user_message: String, retryable: bool },
}

impl TestOutcome {
    fn from_result(result: Result<serde_json::Value, InvokeError>) -> Self {
        match result {
            Ok(value) => Self::Ok { value },
            Err(err) => Self::Failed {
                error: err.to_string(),
                user_message: err.user_message().to_string(),
                retryable: err.is_retryable(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TestInvocation {
    pub target: String,
    pub method: String,
    pub elapsed_ms: u64,
    pub outcome: TestOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FanOutEntry {
    pub connection_id: ConnectionId,
    pub elapsed_ms: u64,
    pub outcome: TestOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FanOutReport {
    pub method: String,
    pub replies: Vec<FanOutEntry>,
    pub missing: Vec<ConnectionId>,
    pub expired: bool,
}

pub struct Diagnostics {
    gateway: Arc<InvocationGateway>,
}

impl Diagnostics {
    pub fn new(gateway: Arc<InvocationGateway>) -> Self {
        Self { gateway }
    }

    pub fn status(&self) -> GatewayStatus {
        let directory = self.gateway.directory();
        let responses = self.gateway.responses();
        GatewayStatus {
            connected_users: directory.connected_user_count(),
            connections: directory.connection_count(),
            in_flight: self.gateway.in_flight(),
            max_concurrent_calls: self.gateway.config().max_concurrent_calls,
            pending_calls: responses.pending_len(),
            streaming_calls: responses.streaming_len(),
        }
    }

    pub fn connected_user_count(&self) -> usize {
        self.gateway.directory().connected_user_count()
    }

    pub fn listing(&self) -> Vec<ConnectionListing> {
        self.gateway
            .directory()
            .all_connections()
            .into_iter()
            .map(|(user_id, connections)| ConnectionListing { user_id, connections })
            .collect()
    }

    pub fn connections_of(&self, user_id: &UserId) -> BTreeSet<ConnectionId> {
        self.gateway.directory().connections_of(user_id)
    }

    /// Run one single-reply call and report the outcome instead of failing.
    pub async fn test_invoke(
        &self,
        target: Target,
        method: &str,
        argument: serde_json::Value,
        options: CallOptions,
    ) -> TestInvocation {
        let description = target.describe();
        let started = Instant::now();
        let result = self.gateway.invoke(target, method, &argument, options).await;
        TestInvocation {
            target: description,
            method: method.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            outcome: TestOutcome::from_result(result),
        }
    }

    /// Streaming call to `connection_ids`, collected into a report.
    pub async fn test_fan_out(
        &self,
        connection_ids: &[ConnectionId],
        method: &str,
        argument: serde_json::Value,
        options: CallOptions,
    ) -> Result<FanOutReport, InvokeError> {
        let started = Instant::now();
        let mut stream = self
            .gateway
            .invoke_many_streaming_with::<_, serde_json::Value>(connection_ids, method, &argument, options)
            .await?;
        let mut replies = Vec::new();
        while let Some(item) = stream.next().await {
            replies.push(FanOutEntry {
                connection_id: item.connection_id,
                elapsed_ms: item.received_at.saturating_duration_since(started).as_millis() as u64,
                outcome: TestOutcome::from_result(item.result),
            });
        }
        Ok(FanOutReport {
            method: method.to_string(),
            replies,
            missing: stream.pending_targets(),
            expired: stream.is_expired(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::registry::{ConnectionDirectory, ConnectionRegistry};
    use tether_proto::NullTransport;

    fn diagnostics() -> Diagnostics {
        let directory = Arc::new(ConnectionRegistry::new());
        directory.add_connection(ConnectionId::new("c1"), UserId::new("alice"), Some("laptop".into()));
        directory.add_connection(ConnectionId::new("c2"), UserId::new("alice"), None);
        directory.add_connection(ConnectionId::new("c3"), UserId::new("bob"), None);
        let gateway =
            InvocationGateway::new(GatewayConfig::default(), directory, Arc::new(NullTransport)).expect("gateway");
        Diagnostics::new(Arc::new(gateway))
    }

    #[test]
    fn status_and_listing() {
        let diagnostics = diagnostics();
        let status = diagnostics.status();
        assert_eq!(status.connected_users, 2);
        assert_eq!(status.connections, 3);
        assert_eq!(status.in_flight, 0);
        assert_eq!(diagnostics.connected_user_count(), 2);

        let listing = diagnostics.listing();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].user_id, UserId::new("alice"));
        assert_eq!(listing[0].connections.len(), 2);
        assert_eq!(diagnostics.connections_of(&UserId::new("bob")).len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_reports_failures_as_values() {
        let diagnostics = diagnostics();
        let report = diagnostics
            .test_invoke(Target::User(UserId::new("carol")), "Ping", serde_json::Value::Null, CallOptions::default())
            .await;
        assert!(!report.outcome.is_ok());
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["user_message"], "recipient unavailable");
    }
}
