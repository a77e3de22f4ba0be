//! Wire protocol between server and client
//!
//! Messages travel as WebSocket frames: text frames carry JSON, binary frames
//! carry CBOR. Both ends answer in the format the peer used.
//!
//! ## Flow
//!
//! 1. Client sends `attach` with its page route and any stored token
//! 2. Server answers `attached` with the connection id and fresh tokens
//! 3. Server pushes `instruction` envelopes; those carrying a `reference`
//!    expect a `reply` with the same reference

mod codec;
mod error;
mod instruction;
mod message;

pub use codec::{decode_frame, encode_frame, WireFormat};
pub use error::ProtocolError;
pub use instruction::{AttributePatch, ContentPatch, Instruction, PropertyPatch, PropertyQuery};
pub use message::{
    ClientMessage, ConnectionId, InstructionEnvelope, Reference, ReplyEnvelope, ReplyStatus,
    ServerMessage,
};
