use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 16;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ADMISSION_WAIT: Duration = Duration::from_secs(30);
pub const DEFAULT_INLINE_THRESHOLD_BYTES: usize = 32 * 1024;
pub const DEFAULT_BLOB_FOLDER: &str = "replies";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings consumed by [`InvocationGateway`](crate::InvocationGateway).
///
/// Durations are written in seconds and may be fractional:
///
/// ```toml
/// max_concurrent_calls = 16
/// request_timeout_secs = 30
/// admission_wait_secs = 0.5
/// inline_threshold_bytes = 32768
/// auto_delete_offloaded = true
/// blob_folder = "replies"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub max_concurrent_calls: usize,
    #[serde(rename = "request_timeout_secs", with = "duration_secs")]
    pub request_timeout: Duration,
    #[serde(rename = "admission_wait_secs", with = "duration_secs")]
    pub admission_wait: Duration,
    pub inline_threshold_bytes: usize,
    pub auto_delete_offloaded: bool,
    pub blob_folder: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            admission_wait: DEFAULT_ADMISSION_WAIT,
            inline_threshold_bytes: DEFAULT_INLINE_THRESHOLD_BYTES,
            auto_delete_offloaded: true,
            blob_folder: DEFAULT_BLOB_FOLDER.to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_calls must be greater than zero".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.blob_folder.trim().is_empty() {
            return Err(ConfigError::Invalid("blob_folder must not be empty".into()));
        }
        Ok(())
    }

    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_admission_wait(mut self, wait: Duration) -> Self {
        self.admission_wait = wait;
        self
    }

    pub fn with_inline_threshold(mut self, bytes: usize) -> Self {
        self.inline_threshold_bytes = bytes;
        self
    }

    pub fn with_auto_delete(mut self, enabled: bool) -> Self {
        self.auto_delete_offloaded = enabled;
        self
    }
}

/// Serde adapter writing a `Duration` as (possibly fractional) seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| de::Error::custom(format!("invalid duration: {secs} seconds")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.max_concurrent_calls, 16);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.admission_wait, Duration::from_secs(30));
        assert_eq!(config.inline_threshold_bytes, 32 * 1024);
        assert!(config.auto_delete_offloaded);
        assert_eq!(config.blob_folder, "replies");
    }

    #[test]
    fn parses_partial_toml_with_fractional_seconds() {
        let config = GatewayConfig::from_toml(
            r#"
max_concurrent_calls = 4
admission_wait_secs = 0.25
"#,
        )
        .expect("parse");
        assert_eq!(config.max_concurrent_calls, 4);
        assert_eq!(config.admission_wait, Duration::from_millis(250));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn rejects_zero_capacity_and_negative_durations() {
        let err = GatewayConfig::from_toml("max_concurrent_calls = 0").expect_err("zero capacity");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = GatewayConfig::from_toml("request_timeout_secs = -1").expect_err("negative");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serializes_back_to_toml() {
        let config = GatewayConfig::default().with_request_timeout(Duration::from_millis(1500));
        let text = toml::to_string(&config).expect("serialize");
        assert!(text.contains("request_timeout_secs = 1.5"));
        assert_eq!(GatewayConfig::from_toml(&text).expect("reparse"), config);
    }
}
