//! Liveness reconciliation for directories that can outlive their links.
//!
//! Every known connection is probed through the gateway. Responders are
//! live; non-responders older than `max_age` are evicted. A round with zero
//! responders evicts nothing, because that points at probe delivery failing
//! rather than every client being gone.

use std::collections::HashSet;
use std::time::Duration;

use serde::de::IgnoredAny;
use serde::Serialize;
use tether_proto::{ConnectionId, InvokeError};

use crate::gateway::{CallOptions, InvocationGateway};
use crate::helpers::now_millis_u64;
use crate::registry::ConnectionDirectory;

#[derive(Clone, Debug)]
pub struct LivenessProbe {
    pub method: String,
    pub timeout: Duration,
    /// Connections younger than this are never evicted.
    pub max_age: Duration,
}

impl Default for LivenessProbe {
    fn default() -> Self {
        Self { method: "Ping".to_string(), timeout: Duration::from_secs(5), max_age: Duration::from_secs(60) }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub probed: usize,
    pub responders: usize,
    pub evicted: Vec<ConnectionId>,
    /// Eviction was skipped because nobody answered.
    pub skipped: bool,
}

pub async fn reconcile_liveness(
    gateway: &InvocationGateway,
    probe: &LivenessProbe,
) -> Result<ReconcileReport, InvokeError> {
    let targets = gateway.directory().connection_ids();
    if targets.is_empty() {
        return Ok(ReconcileReport::default());
    }

    let options = CallOptions::default().with_timeout(probe.timeout);
    let stream = gateway
        .invoke_many_streaming_with::<_, IgnoredAny>(&targets, &probe.method, &(), options)
        .await?;
    let responders: HashSet<ConnectionId> = stream
        .collect()
        .await
        .into_iter()
        .filter(|item| item.result.is_ok())
        .map(|item| item.connection_id)
        .collect();

    let evicted =
        evict_unresponsive(gateway.directory().as_ref(), &responders, probe.max_age, now_millis_u64());
    let report = ReconcileReport {
        probed: targets.len(),
        responders: responders.len(),
        evicted,
        skipped: responders.is_empty(),
    };
    log::info!(
        "reconcile: probed {} responders {} evicted {}{}",
        report.probed,
        report.responders,
        report.evicted.len(),
        if report.skipped { " (skipped, no responders)" } else { "" }
    );
    Ok(report)
}

/// Remove every connection that is not in `responders` and is at least
/// `max_age` old. Returns the evicted ids.
pub fn evict_unresponsive(
    directory: &dyn ConnectionDirectory,
    responders: &HashSet<ConnectionId>,
    max_age: Duration,
    now_ms: u64,
) -> Vec<ConnectionId> {
    if responders.is_empty() {
        log::warn!("reconcile: no responders, not evicting anything");
        return Vec::new();
    }
    let mut evicted = Vec::new();
    for connection in directory.all_connections().into_values().flatten() {
        if responders.contains(&connection.connection_id) || connection.age(now_ms) < max_age {
            continue;
        }
        if directory.remove_connection(&connection.connection_id) {
            log::info!(
                "reconcile: evicted {} of {} (age {:?})",
                connection.connection_id,
                connection.user_id,
                connection.age(now_ms)
            );
            evicted.push(connection.connection_id);
        }
    }
    evicted
}
