//! Routing for frames from active participants.
//!
//! The router decides where a frame goes; it performs no I/O. The handler
//! executes the returned [`RouteAction`].
//!
//! | Kind            | Action                                               |
//! |-----------------|------------------------------------------------------|
//! | `Text`          | broadcast to everyone, sender included               |
//! | `EncryptedText` | broadcast to everyone, sender included               |
//! | `KeyRequest`    | reply with the named key, or "user not found"        |
//! | `PublicKeyMap`  | reply with the current key map                       |
//! | `PublicKey`     | reply "already registered" (keys bind once)          |
//!
//! Envelopes are never inspected here. Every connection receives the same
//! `EncryptedText` frame, including the sender, whose own `open` finds no
//! entry because the sender skips itself when sealing.

use parley_proto::{Frame, Message, MessageKind, notice};

use crate::{error::HandlerError, registry::ConnectionRegistry, transmit::Transmit};

/// What to do with a routed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Deliver to every active participant except `exclude`.
    Broadcast {
        /// Message to deliver.
        message: Message,
        /// Participant to skip, if any.
        exclude: Option<String>,
    },

    /// Send to the originating connection only.
    Reply(Message),
}

/// Route one frame received from the active participant `sender`.
///
/// The message's `sender` field is overwritten with `sender` before
/// anything is forwarded.
pub fn route<T: Transmit>(
    registry: &ConnectionRegistry<T>,
    sender: &str,
    frame: Frame,
) -> Result<RouteAction, HandlerError> {
    let message = match frame {
        Frame::Message(message) => message.with_sender(sender),
        Frame::Username(_) => {
            return Err(HandlerError::ProtocolViolation {
                state: "Active",
                reason: "username frame after handshake".to_string(),
            });
        },
    };

    let action = match message.kind {
        MessageKind::Text | MessageKind::EncryptedText => {
            RouteAction::Broadcast { message, exclude: None }
        },

        MessageKind::KeyRequest => {
            let target = message.recipient.unwrap_or_default();
            match registry.public_key(&target) {
                Some(key) => RouteAction::Reply(Message::public_key_reply(target, sender, key)),
                None => RouteAction::Reply(Message::notice(notice::user_not_found(&target))),
            }
        },

        MessageKind::PublicKeyMap => {
            RouteAction::Reply(Message::key_map(&registry.snapshot_key_map())?)
        },

        MessageKind::PublicKey => {
            RouteAction::Reply(Message::notice(notice::KEY_ALREADY_REGISTERED))
        },
    };

    Ok(action)
}
