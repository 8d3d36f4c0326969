use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_rpc::{ConfigError, GatewayConfig, LinkBehavior};

pub const DEFAULT_DELAY_MS: u64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum DiagConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Gateway(#[from] ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientBehavior {
    #[default]
    Responsive,
    Refuse,
    Silent,
    Delayed,
    Stalled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub connection_id: String,
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub behavior: ClientBehavior,
    /// Only used by `delayed` clients.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl ClientConfig {
    pub fn link_behavior(&self) -> LinkBehavior {
        match self.behavior {
            ClientBehavior::Responsive => LinkBehavior::Responsive,
            ClientBehavior::Refuse => LinkBehavior::RefuseSends,
            ClientBehavior::Silent => LinkBehavior::Silent,
            ClientBehavior::Delayed => {
                LinkBehavior::Delayed(Duration::from_millis(self.delay_ms.unwrap_or(DEFAULT_DELAY_MS)))
            }
            ClientBehavior::Stalled => LinkBehavior::Stalled,
        }
    }
}

/// Simulated fleet plus gateway settings.
///
/// ```toml
/// blob_dir = "/tmp/tether-blobs"
///
/// [gateway]
/// max_concurrent_calls = 4
/// request_timeout_secs = 2
///
/// [[clients]]
/// connection_id = "conn-1"
/// user_id = "alice"
/// behavior = "delayed"
/// delay_ms = 250
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    /// Offloaded replies go to files under this directory; in memory when unset.
    #[serde(default)]
    pub blob_dir: Option<PathBuf>,
}

impl Default for DiagConfig {
    fn default() -> Self {
        let client = |connection_id: &str, user_id: &str, behavior, delay_ms| ClientConfig {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            display_name: None,
            behavior,
            delay_ms,
        };
        Self {
            gateway: GatewayConfig::default().with_request_timeout(Duration::from_secs(2)),
            clients: vec![
                client("conn-1", "alice", ClientBehavior::Responsive, None),
                client("conn-2", "alice", ClientBehavior::Delayed, Some(200)),
                client("conn-3", "bob", ClientBehavior::Responsive, None),
                client("conn-4", "carol", ClientBehavior::Silent, None),
            ],
            blob_dir: None,
        }
    }
}

impl DiagConfig {
    pub fn from_toml(input: &str) -> Result<Self, DiagConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DiagConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), DiagConfigError> {
        self.gateway.validate()?;
        let mut seen = HashSet::new();
        for client in &self.clients {
            if client.connection_id.trim().is_empty() || client.user_id.trim().is_empty() {
                return Err(DiagConfigError::Invalid("client ids must not be empty".into()));
            }
            if !seen.insert(client.connection_id.as_str()) {
                return Err(DiagConfigError::Invalid(format!(
                    "duplicate connection_id: {}",
                    client.connection_id
                )));
            }
        }
        Ok(())
    }
}
