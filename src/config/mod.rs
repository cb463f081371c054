//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Sensible defaults for every knob
//! - JSON loading (missing fields fall back to defaults)
//! - Nested observer and resolver sections

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observer::ObserverConfig;
use crate::resolver::ResolverConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Complete auditor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    pub observer: ObserverConfig,
    pub resolver: ResolverConfig,
    pub enable_metrics: bool,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            observer: ObserverConfig::default(),
            resolver: ResolverConfig::default(),
            enable_metrics: true,
        }
    }
}

impl AuditorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: AuditorConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.observer.navigation_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "observer.navigation_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.resolver.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "resolver.timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.resolver.region.trim().is_empty() || self.resolver.region.contains('/') {
            return Err(ConfigError::Invalid {
                field: "resolver.region",
                reason: format!("'{}' is not a dataset region", self.resolver.region),
            });
        }
        Ok(())
    }
}

/// Serde helper storing a `Duration` as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AuditorConfig::from_json_str("{}").unwrap();
        assert_eq!(config.observer.navigation_timeout, Duration::from_secs(60));
        assert_eq!(config.observer.quiet_window, Duration::from_millis(500));
        assert_eq!(config.resolver.timeout, Duration::from_secs(10));
        assert_eq!(config.resolver.region, "US");
        assert_eq!(config.observer.user_agent, "tracker-audit/1.1");
        assert!(config.enable_metrics);
    }

    #[test]
    fn reads_nested_overrides() {
        let config = AuditorConfig::from_json_str(
            r#"{"observer":{"navigation_timeout_ms":15000},"resolver":{"region":"AU","max_concurrent_lookups":3}}"#,
        )
        .unwrap();
        assert_eq!(config.observer.navigation_timeout, Duration::from_secs(15));
        assert!(config.observer.ignore_certificate_errors);
        assert_eq!(config.resolver.region, "AU");
        assert_eq!(config.resolver.max_concurrent_lookups, 3);
    }

    #[test]
    fn rejects_zero_timeouts() {
        let err = AuditorConfig::from_json_str(r#"{"resolver":{"timeout_ms":0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "resolver.timeout_ms", .. }));
    }
}
