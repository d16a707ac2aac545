//! Engine configuration

use serde::Deserialize;
use std::time::Duration;

use crate::adapters::engine::EngineOptions;
use crate::domain::engine::TransportKind;

use super::error::ValidationError;

/// Heartbeat, upgrade and transport settings of engine connections
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    /// Delay before an unfinished websocket upgrade is cancelled
    #[serde(default = "default_upgrade_timeout")]
    pub upgrade_timeout_ms: u64,

    /// Largest accepted message or polling body, in bytes
    #[serde(default = "default_max_http_buffer_size")]
    pub max_http_buffer_size: usize,

    /// Allowed transports (comma-separated, `polling` and/or `websocket`)
    #[serde(default = "default_transports")]
    pub transports: String,
}

impl EngineConfig {
    pub fn transport_list(&self) -> Result<Vec<TransportKind>, ValidationError> {
        self.transports
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|name| {
                TransportKind::parse(name)
                    .ok_or_else(|| ValidationError::UnknownTransport(name.to_string()))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ping_interval_ms == 0 || self.ping_timeout_ms == 0 || self.upgrade_timeout_ms == 0
        {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.max_http_buffer_size == 0 {
            return Err(ValidationError::InvalidBufferSize);
        }
        if self.transport_list()?.is_empty() {
            return Err(ValidationError::MissingRequired("ENGINE__TRANSPORTS"));
        }
        Ok(())
    }

    /// Options handed to the engine server.
    pub fn to_options(&self) -> Result<EngineOptions, ValidationError> {
        Ok(EngineOptions {
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            upgrade_timeout: Duration::from_millis(self.upgrade_timeout_ms),
            max_http_buffer_size: self.max_http_buffer_size,
            transports: self.transport_list()?,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            ping_timeout_ms: default_ping_timeout(),
            upgrade_timeout_ms: default_upgrade_timeout(),
            max_http_buffer_size: default_max_http_buffer_size(),
            transports: default_transports(),
        }
    }
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

fn default_upgrade_timeout() -> u64 {
    10_000
}

fn default_max_http_buffer_size() -> usize {
    1_000_000
}

fn default_transports() -> String {
    "polling,websocket".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_defaults() {
        let options = EngineConfig::default().to_options().unwrap();
        assert_eq!(options, EngineOptions::default());
    }

    #[test]
    fn test_transport_list_parsing() {
        let config = EngineConfig {
            transports: " websocket ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.transport_list().unwrap(), vec![TransportKind::Websocket]);
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        let config = EngineConfig {
            transports: "polling,flashsocket".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::UnknownTransport(name)) if name == "flashsocket"
        ));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let config = EngineConfig {
            ping_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
