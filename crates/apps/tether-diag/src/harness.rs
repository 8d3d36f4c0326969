use std::sync::Arc;

use serde::Serialize;
use tether_proto::{BlobStore, ConnectionId, UserId};
use tether_rpc::{
    ConnectionRegistry, Diagnostics, FileBlobStore, InvocationGateway, LoopbackTransport, MemoryBlobStore,
    MethodTable, PayloadPolicy, Target,
};

use crate::config::{DiagConfig, DiagConfigError};

#[derive(Debug, Serialize)]
struct Pong {
    pong: bool,
}

/// Methods every simulated client answers.
///
/// - `Ping` → `{"pong": true}`
/// - `Echo` → its argument
/// - `Large` → a string of the requested length, for exercising offload
/// - `Fail` → a fault carrying the given message
pub fn client_methods(policy: PayloadPolicy) -> MethodTable {
    let mut methods = MethodTable::new().with_policy(policy);
    methods
        .register("Ping", |_: serde_json::Value| async move { Ok(Pong { pong: true }) })
        .register("Echo", |value: serde_json::Value| async move { Ok(value) })
        .register("Large", |len: usize| async move { Ok("x".repeat(len)) })
        .register("Fail", |message: String| async move { Err::<(), _>(message) });
    methods
}

/// `conn:ID`, `user:ID`, `users:A,B` or `all`.
pub fn parse_target(raw: &str) -> Result<Target, String> {
    if raw == "all" {
        return Ok(Target::All);
    }
    let (kind, value) = raw.split_once(':').ok_or_else(|| format!("malformed target: {raw}"))?;
    if value.is_empty() {
        return Err(format!("empty target id: {raw}"));
    }
    match kind {
        "conn" => Ok(Target::Connection(ConnectionId::new(value))),
        "user" => Ok(Target::User(UserId::new(value))),
        "users" => Ok(Target::Users(value.split(',').map(|id| UserId::new(id.trim())).collect())),
        other => Err(format!("unknown target kind: {other}")),
    }
}

pub struct DiagHarness {
    pub registry: Arc<ConnectionRegistry>,
    pub transport: Arc<LoopbackTransport>,
    pub gateway: Arc<InvocationGateway>,
    pub diagnostics: Diagnostics,
}

impl DiagHarness {
    pub fn build(config: &DiagConfig) -> Result<Self, DiagConfigError> {
        config.validate()?;
        let store: Arc<dyn BlobStore> = match config.blob_dir.as_deref() {
            Some(dir) => Arc::new(FileBlobStore::new(dir)),
            None => Arc::new(MemoryBlobStore::new()),
        };

        let registry = Arc::new(ConnectionRegistry::new());
        let transport = Arc::new(LoopbackTransport::new(registry.clone()));
        let gateway = InvocationGateway::new(config.gateway.clone(), registry.clone(), transport.clone())?
            .with_blob_store(store.clone());
        let gateway = Arc::new(gateway);

        let methods = Arc::new(client_methods(PayloadPolicy::from_config(&config.gateway, Some(store))));
        for client in &config.clients {
            let connection_id = ConnectionId::new(client.connection_id.as_str());
            transport.connect(
                connection_id.clone(),
                UserId::new(client.user_id.as_str()),
                client.display_name.clone(),
                Arc::clone(&methods),
            );
            transport.set_behavior(&connection_id, client.link_behavior());
        }
        log::debug!("diag: {} simulated client(s) connected", config.clients.len());

        Ok(Self { diagnostics: Diagnostics::new(gateway.clone()), registry, transport, gateway })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_targets() {
        assert_eq!(parse_target("all"), Ok(Target::All));
        assert_eq!(parse_target("conn:c1"), Ok(Target::Connection(ConnectionId::new("c1"))));
        assert_eq!(parse_target("user:alice"), Ok(Target::User(UserId::new("alice"))));
        assert_eq!(
            parse_target("users:alice, bob"),
            Ok(Target::Users(vec![UserId::new("alice"), UserId::new("bob")]))
        );
        assert!(parse_target("alice").is_err());
        assert!(parse_target("user:").is_err());
        assert!(parse_target("group:x").is_err());
    }
}
