//! Protocol module containing the message model, the binary codec and the
//! Property Exchange chunking helpers.

pub mod chunks;
pub mod codec;
pub mod messages;
pub mod packing;
pub mod sequence;

pub use chunks::{split_into_chunks, ChunkError, ChunkProgress, ChunkReassembler};
pub use codec::{decode_header, decode_message, encode_into, encode_message, ProtocolError, RawHeader};
pub use messages::*;
pub use sequence::RequestIdCounter;
