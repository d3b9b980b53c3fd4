//! Protocol module containing the host RPC message types and the binary codec.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_frame, encode_frame, Frame, ProtocolError};
pub use messages::*;
pub use sequence::SequenceCounter;
