use std::fmt;

use crate::domain::engine::CloseReason;

/// Why a socket left its namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The underlying connection closed.
    Transport(CloseReason),
    ClientNamespaceDisconnect,
    ServerNamespaceDisconnect,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Transport(reason) => reason.as_str(),
            DisconnectReason::ClientNamespaceDisconnect => "client namespace disconnect",
            DisconnectReason::ServerNamespaceDisconnect => "server namespace disconnect",
        }
    }

    /// Whether a session may be restored after this disconnection.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DisconnectReason::Transport(_))
    }
}

impl From<CloseReason> for DisconnectReason {
    fn from(reason: CloseReason) -> Self {
        DisconnectReason::Transport(reason)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
