//! Connection registry: which links are up and which user owns them.
//!
//! State lives in memory only and is rebuilt from live reconnects after a
//! restart. A durable variant can implement [`ConnectionDirectory`] instead;
//! it then needs periodic liveness reconciliation (see [`crate::reconcile`]).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;
use tether_proto::{ConnectionId, UserId};

use crate::helpers::now_millis_u64;

/// One live link. Created on link-up, dropped on link-down, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub display_name: Option<String>,
    /// Unix epoch milliseconds.
    pub established_at_ms: u64,
}

impl Connection {
    pub fn new(connection_id: ConnectionId, user_id: UserId, display_name: Option<String>) -> Self {
        Self { connection_id, user_id, display_name, established_at_ms: now_millis_u64() }
    }

    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.established_at_ms))
    }
}

/// Lookup contract the gateway needs from a connection registry.
///
/// Implementations must be safe under unbounded concurrent callers without
/// any locking on the caller's side.
pub trait ConnectionDirectory: Send + Sync {
    /// Record a link. Re-adding a known connection id replaces the entry.
    fn add_connection(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: Option<String>,
    ) -> Connection;

    fn remove_connection(&self, connection_id: &ConnectionId) -> bool;

    fn connection(&self, connection_id: &ConnectionId) -> Option<Connection>;

    fn connections_of(&self, user_id: &UserId) -> BTreeSet<ConnectionId>;

    fn all_connections(&self) -> BTreeMap<UserId, Vec<Connection>>;

    fn is_user_connected(&self, user_id: &UserId) -> bool {
        !self.connections_of(user_id).is_empty()
    }

    fn user_of(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.connection(connection_id).map(|connection| connection.user_id)
    }

    fn connection_ids(&self) -> Vec<ConnectionId> {
        self.all_connections()
            .into_values()
            .flatten()
            .map(|connection| connection.connection_id)
            .collect()
    }

    fn connected_user_count(&self) -> usize {
        self.all_connections().len()
    }

    fn connection_count(&self) -> usize {
        self.all_connections().values().map(Vec::len).sum()
    }
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    users: HashMap<UserId, BTreeSet<ConnectionId>>,
}

impl RegistryState {
    fn detach(&mut self, connection_id: &ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(connection_id)?;
        if let Some(ids) = self.users.get_mut(&connection.user_id) {
            ids.remove(connection_id);
            if ids.is_empty() {
                self.users.remove(&connection.user_id);
            }
        }
        Some(connection)
    }
}

/// In-memory [`ConnectionDirectory`].
#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully built connection, replacing any entry with the same id.
    pub fn insert(&self, connection: Connection) -> Connection {
        let mut state = self.state.write().expect("registry lock poisoned");
        if let Some(previous) = state.detach(&connection.connection_id) {
            if previous.user_id != connection.user_id {
                log::warn!(
                    "registry: connection {} moved from user {} to {}",
                    connection.connection_id,
                    previous.user_id,
                    connection.user_id
                );
            }
        }
        state
            .users
            .entry(connection.user_id.clone())
            .or_default()
            .insert(connection.connection_id.clone());
        state.connections.insert(connection.connection_id.clone(), connection.clone());
        log::debug!(
            "registry: added connection {} for user {}",
            connection.connection_id,
            connection.user_id
        );
        connection
    }
}

impl ConnectionDirectory for ConnectionRegistry {
    fn add_connection(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: Option<String>,
    ) -> Connection {
        self.insert(Connection::new(connection_id, user_id, display_name))
    }

    fn remove_connection(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.state.write().expect("registry lock poisoned").detach(connection_id);
        match removed {
            Some(connection) => {
                log::debug!(
                    "registry: removed connection {} for user {}",
                    connection_id,
                    connection.user_id
                );
                true
            }
            None => false,
        }
    }

    fn connection(&self, connection_id: &ConnectionId) -> Option<Connection> {
        self.state.read().expect("registry lock poisoned").connections.get(connection_id).cloned()
    }

    fn connections_of(&self, user_id: &UserId) -> BTreeSet<ConnectionId> {
        self.state
            .read()
            .expect("registry lock poisoned")
            .users
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    fn all_connections(&self) -> BTreeMap<UserId, Vec<Connection>> {
        let state = self.state.read().expect("registry lock poisoned");
        let mut grouped: BTreeMap<UserId, Vec<Connection>> = BTreeMap::new();
        for (user_id, ids) in &state.users {
            let connections =
                ids.iter().filter_map(|id| state.connections.get(id)).cloned().collect();
            grouped.insert(user_id.clone(), connections);
        }
        grouped
    }

    fn is_user_connected(&self, user_id: &UserId) -> bool {
        self.state.read().expect("registry lock poisoned").users.contains_key(user_id)
    }

    fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> =
            self.state.read().expect("registry lock poisoned").connections.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn connected_user_count(&self) -> usize {
        self.state.read().expect("registry lock poisoned").users.len()
    }

    fn connection_count(&self) -> usize {
        self.state.read().expect("registry lock poisoned").connections.len()
    }
}
