//! Wire-level protocol types
//!
//! STOMP frame codec, message/body types and price-feed topic helpers.

pub mod frame;
pub mod messages;
pub mod topics;

pub use frame::{Command, Decoded, Frame, FrameDecoder, FrameError};
pub use messages::*;
pub use topics::*;
