//! Physical channels carrying an engine connection.
//!
//! A long-polling transport can only write while a GET is parked on it; a
//! websocket transport is a channel drained by the task pumping the socket.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::domain::engine::{encode_payload, EnginePacket, Frame, TransportKind};

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one websocket so late events of a discarded socket are ignored.
pub(crate) fn next_transport_id() -> u64 {
    NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Instructions for the task pumping a websocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsCommand {
    Send(Frame),
    Close,
}

pub(crate) enum Transport {
    Polling {
        /// Parked GET, answered with one payload.
        pending: Option<oneshot::Sender<String>>,
    },
    WebSocket {
        id: u64,
        tx: mpsc::UnboundedSender<WsCommand>,
    },
}

impl Transport {
    pub fn polling() -> Self {
        Transport::Polling { pending: None }
    }

    pub fn websocket(id: u64, tx: mpsc::UnboundedSender<WsCommand>) -> Self {
        Transport::WebSocket { id, tx }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Polling { .. } => TransportKind::Polling,
            Transport::WebSocket { .. } => TransportKind::Websocket,
        }
    }

    pub fn websocket_id(&self) -> Option<u64> {
        match self {
            Transport::WebSocket { id, .. } => Some(*id),
            Transport::Polling { .. } => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Transport::Polling { pending } => pending.as_ref().is_some_and(|tx| !tx.is_closed()),
            Transport::WebSocket { tx, .. } => !tx.is_closed(),
        }
    }

    /// Whether a GET is already parked on this polling transport.
    pub fn has_pending_poll(&self) -> bool {
        matches!(self, Transport::Polling { pending: Some(tx) } if !tx.is_closed())
    }

    pub fn park(&mut self, responder: oneshot::Sender<String>) {
        if let Transport::Polling { pending } = self {
            *pending = Some(responder);
        }
    }

    /// Writes packets; callers check [`Transport::is_writable`] first.
    pub fn send(&mut self, packets: Vec<EnginePacket>) {
        match self {
            Transport::Polling { pending } => {
                if let Some(responder) = pending.take() {
                    let _ = responder.send(encode_payload(&packets));
                }
            }
            Transport::WebSocket { tx, .. } => {
                for packet in packets {
                    if tx.send(WsCommand::Send(packet.encode_frame())).is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Releases a parked GET with a `noop`; returns whether one was parked.
    pub fn discard(&mut self) -> bool {
        match self {
            Transport::Polling { pending } => match pending.take() {
                Some(responder) => responder.send(EnginePacket::Noop.encode_text()).is_ok(),
                None => false,
            },
            Transport::WebSocket { .. } => false,
        }
    }

    /// Writes what is left followed by a `close` packet, then shuts the channel.
    pub fn close(&mut self, mut remaining: Vec<EnginePacket>) {
        remaining.push(EnginePacket::Close);
        self.send(remaining);
        if let Transport::WebSocket { tx, .. } = self {
            let _ = tx.send(WsCommand::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_is_writable_only_with_a_parked_request() {
        let mut transport = Transport::polling();
        assert!(!transport.is_writable());

        let (tx, mut rx) = oneshot::channel();
        transport.park(tx);
        assert!(transport.is_writable());

        transport.send(vec![
            EnginePacket::Message(Frame::Text("a".into())),
            EnginePacket::Message(Frame::Text("b".into())),
        ]);
        assert_eq!(rx.try_recv().unwrap(), "4a\x1e4b");
        assert!(!transport.is_writable());
    }

    #[test]
    fn discard_answers_parked_request_with_noop() {
        let mut transport = Transport::polling();
        assert!(!transport.discard());

        let (tx, mut rx) = oneshot::channel();
        transport.park(tx);
        assert!(transport.discard());
        assert_eq!(rx.try_recv().unwrap(), "6");
    }

    #[test]
    fn websocket_close_flushes_then_closes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = Transport::websocket(next_transport_id(), tx);

        transport.close(vec![EnginePacket::Message(Frame::Binary(vec![1]))]);

        assert_eq!(rx.try_recv().unwrap(), WsCommand::Send(Frame::Binary(vec![1])));
        assert_eq!(rx.try_recv().unwrap(), WsCommand::Send(Frame::Text("1".into())));
        assert_eq!(rx.try_recv().unwrap(), WsCommand::Close);
    }

    #[test]
    fn transport_ids_are_unique() {
        assert_ne!(next_transport_id(), next_transport_id());
    }
}
