//! Socket layer configuration

use serde::Deserialize;
use std::time::Duration;

use crate::domain::session::RecoveryOptions;

use super::error::ValidationError;

/// Mount path, timeouts and connection state recovery
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// HTTP path serving the endpoint
    #[serde(default = "default_path")]
    pub path: String,

    /// Delay after which a client that joined no namespace is closed
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Default acknowledgement deadline
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Enables connection state recovery
    #[serde(default)]
    pub recovery_enabled: bool,

    /// How long a disconnected session stays restorable
    #[serde(default = "default_max_disconnection")]
    pub max_disconnection_ms: u64,

    /// Skip middlewares when a session is restored
    #[serde(default = "default_skip_middlewares")]
    pub skip_middlewares: bool,

    /// Cap on the packets kept for replay per namespace
    #[serde(default = "default_max_packets")]
    pub max_packets: usize,
}

impl SocketConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Recovery options, when recovery is enabled.
    pub fn recovery(&self) -> Option<RecoveryOptions> {
        self.recovery_enabled.then(|| RecoveryOptions {
            max_disconnection_duration: Duration::from_millis(self.max_disconnection_ms),
            skip_middlewares: self.skip_middlewares,
            max_packets: self.max_packets,
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.path.starts_with('/') {
            return Err(ValidationError::InvalidPath(self.path.clone()));
        }
        if self.connect_timeout_ms == 0 || self.ack_timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.recovery_enabled && (self.max_disconnection_ms == 0 || self.max_packets == 0) {
            return Err(ValidationError::InvalidRecovery);
        }
        Ok(())
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            connect_timeout_ms: default_connect_timeout(),
            ack_timeout_ms: default_ack_timeout(),
            recovery_enabled: false,
            max_disconnection_ms: default_max_disconnection(),
            skip_middlewares: default_skip_middlewares(),
            max_packets: default_max_packets(),
        }
    }
}

fn default_path() -> String {
    "/socket.io/".to_string()
}

fn default_connect_timeout() -> u64 {
    45_000
}

fn default_ack_timeout() -> u64 {
    5_000
}

fn default_max_disconnection() -> u64 {
    120_000
}

fn default_skip_middlewares() -> bool {
    true
}

fn default_max_packets() -> usize {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_disabled_by_default() {
        assert!(SocketConfig::default().recovery().is_none());
    }

    #[test]
    fn test_recovery_defaults_match_session_defaults() {
        let config = SocketConfig {
            recovery_enabled: true,
            ..Default::default()
        };
        assert_eq!(config.recovery(), Some(RecoveryOptions::default()));
    }

    #[test]
    fn test_path_must_be_absolute() {
        let config = SocketConfig {
            path: "socket.io".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ValidationError::InvalidPath(_))));
    }

    #[test]
    fn test_recovery_needs_a_window() {
        let config = SocketConfig {
            recovery_enabled: true,
            max_disconnection_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
