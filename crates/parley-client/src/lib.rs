//! Parley chat client.
//!
//! The client generates an RSA key pair, registers a username with the
//! relay, and keeps a cache of every other participant's public key.
//! Outgoing encrypted messages are sealed once per cached participant;
//! incoming envelopes are opened locally and surfaced as [`ClientEvent`]s.
//!
//! # Components
//!
//! - [`Client`]: async driver that owns the connection
//! - [`Session`]: I/O-free message interpretation and construction
//! - [`KeyCache`]: versioned username → public key cache

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;
mod key_cache;
mod session;

pub use client::{Client, ClientConfig};
pub use error::ClientError;
pub use event::ClientEvent;
pub use key_cache::KeyCache;
pub use parley_proto::notice::UsernameReply;
pub use session::Session;
