//! Parley wire protocol.
//!
//! Types exchanged between the relay server and its clients, and the
//! length-prefixed CBOR framing that carries them.
//!
//! # Components
//!
//! - [`Message`]: routed chat unit, discriminated by [`MessageKind`]
//! - [`Frame`]: wire unit, either a raw username attempt or a [`Message`]
//! - [`KeyMap`]: versioned snapshot of every participant's public key
//! - [`FrameReader`] / [`FrameWriter`]: async framing over byte streams
//! - [`notice`]: fixed server notice texts and their parsers

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod frame;
mod key_map;
mod message;
pub mod notice;

pub use error::ProtoError;
pub use frame::{DEFAULT_MAX_FRAME_SIZE, Frame, FrameReader, FrameWriter, LENGTH_PREFIX_SIZE};
pub use key_map::KeyMap;
pub use message::{DISCONNECT_COMMAND, Message, MessageKind, SERVER_SENDER};
