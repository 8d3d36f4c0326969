#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_proto::{ConnectionId, UserId};
use tether_rpc::{ConnectionRegistry, GatewayConfig, InvocationGateway, LoopbackTransport, MethodTable};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub pong: bool,
}

/// Ping → `{pong: true}`, Whoami → `name`, Echo → its argument.
pub fn client_methods(name: &str) -> MethodTable {
    let name = name.to_string();
    let mut methods = MethodTable::new();
    methods
        .register("Ping", |_: ()| async move { Ok(Pong { pong: true }) })
        .register("Whoami", move |_: ()| {
            let name = name.clone();
            async move { Ok(name) }
        })
        .register("Echo", |value: serde_json::Value| async move { Ok(value) });
    methods
}

pub struct Harness {
    pub registry: Arc<ConnectionRegistry>,
    pub transport: Arc<LoopbackTransport>,
    pub gateway: Arc<InvocationGateway>,
}

impl Harness {
    pub fn new(config: GatewayConfig) -> Self {
        Self::customized(config, |gateway| gateway)
    }

    pub fn customized(
        config: GatewayConfig,
        customize: impl FnOnce(InvocationGateway) -> InvocationGateway,
    ) -> Self {
        init_logging();
        let registry = Arc::new(ConnectionRegistry::new());
        let transport = Arc::new(LoopbackTransport::new(registry.clone()));
        let gateway = InvocationGateway::new(config, registry.clone(), transport.clone()).expect("gateway");
        Self { registry, transport, gateway: Arc::new(customize(gateway)) }
    }

    pub fn connect(&self, connection_id: &str, user_id: &str) -> ConnectionId {
        self.connect_with(connection_id, user_id, client_methods(connection_id))
    }

    pub fn connect_with(&self, connection_id: &str, user_id: &str, methods: MethodTable) -> ConnectionId {
        let id = ConnectionId::new(connection_id);
        self.transport.connect(id.clone(), UserId::new(user_id), None, Arc::new(methods));
        id
    }
}
