//! Events surfaced to the application.

/// Something the server delivered, already interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Plain text: a chat line or a server notice.
    Text {
        /// Author, or `"Server"` for notices.
        sender: String,
        /// Message body.
        text: String,
    },

    /// Encrypted message addressed to us, decrypted.
    Message {
        /// Author.
        sender: String,
        /// Decrypted body.
        plaintext: String,
    },

    /// Encrypted message without an entry for us (including our own echo).
    NotAddressed {
        /// Author.
        sender: String,
    },

    /// Encrypted message that carried an entry for us we could not read,
    /// or was not a valid envelope at all.
    Undecryptable {
        /// Author.
        sender: String,
        /// Why opening failed.
        reason: String,
    },

    /// A key map snapshot replaced the cache.
    KeyMapUpdated {
        /// Membership version of the snapshot.
        version: u64,
        /// Participants in the snapshot, sorted.
        usernames: Vec<String>,
    },

    /// A key map older than the cached one arrived and was ignored.
    StaleKeyMap {
        /// Version of the ignored snapshot.
        version: u64,
    },

    /// A single key lookup was answered and cached.
    PublicKey {
        /// Owner of the key.
        username: String,
    },

    /// Server acknowledged `/disconnect`.
    Disconnected,
}
