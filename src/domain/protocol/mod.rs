//! Application protocol carried inside engine messages.

mod packet;
mod reason;

pub use packet::{Packet, PacketType, ProtocolError, MAIN_NAMESPACE};
pub use reason::DisconnectReason;

/// Event names that applications may not emit.
pub const RESERVED_EVENTS: [&str; 6] = [
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

/// Whether `event` is reserved by the protocol.
pub fn is_reserved_event(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}
