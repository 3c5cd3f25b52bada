//! Server notice texts.
//!
//! Server-originated `Text` messages use fixed phrasing so clients can
//! recognise handshake replies without a separate message kind. Builders and
//! parsers live side by side to keep both ends in agreement.

/// Sent immediately after a connection is accepted.
pub const CONNECTION_ACK: &str = "[*] Connection acknowledged by ChatServer";

/// Reply to `/disconnect`.
pub const DISCONNECT_ACK: &str = "[*] Disconnected from the ChatServer successfully";

/// Reply to an empty or whitespace-only username.
pub const USERNAME_EMPTY: &str = "[!] Username cannot be empty.";

/// Reply to a taken username when no free alternative could be found.
pub const USERNAME_UNAVAILABLE: &str = "[!] Username unavailable. Choose another name.";

/// Reply to a second `PublicKey` after the handshake.
pub const KEY_ALREADY_REGISTERED: &str = "[!] Public key already registered.";

const USERNAME_ACCEPTED_PREFIX: &str = "[*] Username accepted: ";
const USERNAME_TAKEN_PREFIX: &str = "[!] Username taken. Try again or use: ";
const USER_NOT_FOUND_PREFIX: &str = "[!] User not found: ";

/// Username accepted; handshake moves on to the key exchange.
pub fn username_accepted(username: &str) -> String {
    format!("{USERNAME_ACCEPTED_PREFIX}{username}")
}

/// Username collision with an unused alternative.
pub fn username_taken(suggestion: &str) -> String {
    format!("{USERNAME_TAKEN_PREFIX}{suggestion}")
}

/// Username over the length limit.
pub fn username_too_long(max: usize) -> String {
    format!("[!] Username too long (max {max} characters).")
}

/// Key lookup for an unknown participant.
pub fn user_not_found(username: &str) -> String {
    format!("{USER_NOT_FOUND_PREFIX}{username}")
}

/// A participant finished the handshake.
pub fn user_joined(username: &str) -> String {
    format!("[*] User {username} has joined the chat.")
}

/// A participant left with `/disconnect`.
pub fn user_left(username: &str) -> String {
    format!("[*] User {username} has left the chat.")
}

/// A participant dropped without `/disconnect`.
pub fn user_lost(username: &str) -> String {
    format!("[!] User {username} lost connection.")
}

/// Handshake reply to a username attempt, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsernameReply {
    /// Registered under this (normalized) name.
    Accepted(String),
    /// Name in use; the server proposes an alternative.
    Taken {
        /// Suggested unused name.
        suggestion: String,
    },
    /// Rejected for another reason (empty, too long, no alternative).
    Rejected(String),
}

impl UsernameReply {
    /// Classify a server notice received during username negotiation.
    pub fn parse(text: &str) -> Self {
        if let Some(name) = text.strip_prefix(USERNAME_ACCEPTED_PREFIX) {
            Self::Accepted(name.to_string())
        } else if let Some(suggestion) = text.strip_prefix(USERNAME_TAKEN_PREFIX) {
            Self::Taken { suggestion: suggestion.to_string() }
        } else {
            Self::Rejected(text.to_string())
        }
    }
}

/// Username named by a "user not found" notice.
pub fn parse_user_not_found(text: &str) -> Option<&str> {
    text.strip_prefix(USER_NOT_FOUND_PREFIX)
}
