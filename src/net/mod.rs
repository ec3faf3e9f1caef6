//! Datagram networking: message types, MessagePack codec, UDP socket

pub mod codec;
pub mod protocol;
pub mod socket;

pub use codec::{CodecError, Envelope};
pub use protocol::{Message, MessageKind, ValidationError};
pub use socket::{NetSocket, RetryPolicy, SocketStats, TransportError};
