//! Connection lifecycle states and close reasons.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::StateMachine;

/// Lifecycle of an engine connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Opening,
    Open,
    Closing,
    Closed,
}

impl StateMachine for ReadyState {
    fn valid_transitions(&self) -> Vec<Self> {
        use ReadyState::*;
        match self {
            Opening => vec![Open, Closed],
            Open => vec![Closing, Closed],
            Closing => vec![Closed],
            Closed => vec![],
        }
    }
}

/// Why an engine connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    TransportError,
    TransportClose,
    ForcedClose,
    PingTimeout,
    ParseError,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TransportError => "transport error",
            CloseReason::TransportClose => "transport close",
            CloseReason::ForcedClose => "forced close",
            CloseReason::PingTimeout => "ping timeout",
            CloseReason::ParseError => "parse error",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of physical channel carrying a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Polling,
    Websocket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Polling => "polling",
            TransportKind::Websocket => "websocket",
        }
    }

    /// Parses a `transport` query value; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "polling" => Some(TransportKind::Polling),
            "websocket" => Some(TransportKind::Websocket),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_can_close_directly() {
        assert_eq!(
            ReadyState::Open.transition_to(ReadyState::Closed),
            Ok(ReadyState::Closed)
        );
    }

    #[test]
    fn opening_cannot_start_closing() {
        assert!(!ReadyState::Opening.can_transition_to(&ReadyState::Closing));
    }

    #[test]
    fn closed_is_terminal() {
        assert!(ReadyState::Closed.is_terminal());
        assert!(ReadyState::Closed.transition_to(ReadyState::Open).is_err());
    }

    #[test]
    fn close_reasons_render_wire_names() {
        assert_eq!(CloseReason::PingTimeout.to_string(), "ping timeout");
        assert_eq!(CloseReason::ForcedClose.as_str(), "forced close");
    }

    #[test]
    fn transport_names_parse() {
        assert_eq!(TransportKind::parse("polling"), Some(TransportKind::Polling));
        assert_eq!(TransportKind::parse("constructor"), None);
        assert_eq!(TransportKind::Websocket.as_str(), "websocket");
    }
}
