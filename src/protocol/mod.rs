//! Framed tagged-message protocol: message types, wire framing and the
//! byte-stream transport they run over.

pub mod frame;
pub mod info;
pub mod message;
pub mod transport;

pub use frame::{encode_message, recv_message, send_message, Framing, MAX_PACKET};
pub use info::{AttrFlags, FileMeta};
pub use message::{
    FileData, FileRequest, ListOptions, Message, OffsetPayload, PeerKind, Tag,
};
pub use transport::{StreamTransport, Transport};
