//! Engine layer vocabulary: packets, framing, request rejections and
//! connection lifecycle.

mod error;
mod packet;
mod request;
mod state;

pub use error::{ConnectionError, EngineErrorCode, ErrorBody};
pub use packet::{
    decode_payload, encode_payload, EnginePacket, Frame, OpenPacket, PacketError,
    RECORD_SEPARATOR,
};
pub use request::EngineRequest;
pub use state::{CloseReason, ReadyState, TransportKind};
