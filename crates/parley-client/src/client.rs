//! Connection driver.
//!
//! [`Client`] owns the stream and walks the handshake:
//!
//! 1. [`Client::connect`] reads the server's acknowledgment
//! 2. [`Client::register`] offers a username (retrying suggestions with
//!    [`Client::register_with_retry`])
//! 3. [`Client::publish_key`] sends the public key and waits for the first
//!    key map, after which the client holds a [`Session`]
//!
//! Frames that arrive while the driver waits for a specific reply are queued
//! and handed out, in order, by [`Client::next_event`].

use std::collections::VecDeque;

use parley_crypto::{KeyPair, PublicKey};
use parley_proto::{
    DEFAULT_MAX_FRAME_SIZE, Frame, FrameReader, FrameWriter, Message, MessageKind,
    SERVER_SENDER, notice::{self, UsernameReply},
};
use rand::rngs::OsRng;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf},
    net::{TcpStream, ToSocketAddrs},
};

use crate::{ClientError, event::ClientEvent, session::Session};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Largest accepted frame body in bytes
    pub max_frame_size: usize,
    /// RSA modulus size for generated keys
    pub key_bits: usize,
    /// Username attempts before giving up on suggestions
    pub max_register_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            key_bits: parley_crypto::DEFAULT_KEY_BITS,
            max_register_attempts: 5,
        }
    }
}

/// Handshake progress.
#[derive(Debug)]
enum Phase {
    /// Acknowledged; no username yet.
    Connected,
    /// Username accepted; key not yet published.
    Registered { username: String },
    /// Handshake complete.
    Active(Session),
}

/// Connected chat client.
pub struct Client<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    config: ClientConfig,
    phase: Phase,
    backlog: VecDeque<Message>,
}

impl Client<TcpStream> {
    /// Connect over TCP and wait for the server's acknowledgment.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(parley_proto::ProtoError::from)?;
        stream.set_nodelay(true).map_err(parley_proto::ProtoError::from)?;
        Self::from_stream(stream, config).await
    }
}

impl<S: AsyncRead + AsyncWrite + Send + Unpin> Client<S> {
    /// Wrap an established stream and wait for the acknowledgment.
    pub async fn from_stream(stream: S, config: ClientConfig) -> Result<Self, ClientError> {
        let (read, write) = tokio::io::split(stream);
        let mut client = Self {
            reader: FrameReader::new(read, config.max_frame_size),
            writer: FrameWriter::new(write, config.max_frame_size),
            config,
            phase: Phase::Connected,
            backlog: VecDeque::new(),
        };

        let ack = client.read_message().await?;
        if ack.sender != SERVER_SENDER || ack.as_text() != Some(notice::CONNECTION_ACK) {
            return Err(ClientError::Handshake {
                reason: format!("expected acknowledgment, got {ack:?}"),
            });
        }
        Ok(client)
    }

    /// Registered username, once accepted.
    pub fn username(&self) -> Option<&str> {
        match &self.phase {
            Phase::Connected => None,
            Phase::Registered { username } => Some(username),
            Phase::Active(session) => Some(session.username()),
        }
    }

    /// Active session, once the handshake is complete.
    pub fn session(&self) -> Option<&Session> {
        match &self.phase {
            Phase::Active(session) => Some(session),
            _ => None,
        }
    }

    /// Offer `username` once.
    ///
    /// The server normalizes whitespace, so an accepted name may differ
    /// from the one offered.
    pub async fn register(&mut self, username: &str) -> Result<UsernameReply, ClientError> {
        if !matches!(self.phase, Phase::Connected) {
            return Err(ClientError::InvalidState { reason: "already registered".to_string() });
        }

        self.writer.write_frame(&Frame::Username(username.to_string())).await?;
        let reply = self.read_message().await?;
        let text = reply.as_text().ok_or_else(|| ClientError::Handshake {
            reason: format!("expected username reply, got {:?}", reply.kind),
        })?;

        let reply = UsernameReply::parse(text);
        if let UsernameReply::Accepted(name) = &reply {
            self.phase = Phase::Registered { username: name.clone() };
        }
        Ok(reply)
    }

    /// Offer `username`, then each suggestion the server makes, until one is
    /// accepted. Returns the accepted name.
    pub async fn register_with_retry(&mut self, username: &str) -> Result<String, ClientError> {
        let mut candidate = username.to_string();
        for _ in 0..self.config.max_register_attempts {
            match self.register(&candidate).await? {
                UsernameReply::Accepted(name) => return Ok(name),
                UsernameReply::Taken { suggestion } => candidate = suggestion,
                UsernameReply::Rejected(reason) => {
                    return Err(ClientError::UsernameRejected { reason });
                },
            }
        }
        Err(ClientError::RegistrationExhausted { attempts: self.config.max_register_attempts })
    }

    /// Publish `keys` and wait for the first key map.
    pub async fn publish_key(&mut self, keys: KeyPair) -> Result<(), ClientError> {
        let Phase::Registered { username } = &self.phase else {
            return Err(ClientError::InvalidState {
                reason: "publish_key requires an accepted username".to_string(),
            });
        };

        let mut session = Session::new(username.clone(), keys);
        self.writer.write_message(&session.public_key_message()?).await?;

        loop {
            let message = self.read_message().await?;
            if message.kind == MessageKind::PublicKeyMap && message.sender == SERVER_SENDER {
                session.handle(message)?;
                break;
            }
            self.backlog.push_back(message);
        }

        self.phase = Phase::Active(session);
        Ok(())
    }

    /// Register (following suggestions) and publish a freshly generated key.
    pub async fn join(&mut self, username: &str) -> Result<String, ClientError> {
        let name = self.register_with_retry(username).await?;
        let keys = KeyPair::generate(&mut OsRng, self.config.key_bits)?;
        self.publish_key(keys).await?;
        Ok(name)
    }

    /// Send a plain text line.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        let message = self.active()?.text_message(text);
        self.writer.write_message(&message).await?;
        Ok(())
    }

    /// Encrypt `text` for every known participant and send it.
    pub async fn send_encrypted(&mut self, text: &str) -> Result<(), ClientError> {
        let message = self.active()?.encrypted_message(&mut OsRng, text)?;
        self.writer.write_message(&message).await?;
        Ok(())
    }

    /// Ask the server for a fresh key map snapshot.
    pub async fn refresh_key_map(&mut self) -> Result<(), ClientError> {
        let message = Message::key_map_request(self.active()?.username());
        self.writer.write_message(&message).await?;
        Ok(())
    }

    /// Key for `username`, from the cache or by asking the server.
    ///
    /// Returns `None` if the server does not know the user.
    pub async fn public_key_of(&mut self, username: &str) -> Result<Option<PublicKey>, ClientError> {
        if let Some(key) = self.active()?.cached_key(username) {
            return Ok(Some(key.clone()));
        }

        let request = self.active()?.key_request(username);
        self.writer.write_message(&request).await?;

        loop {
            let message = self.read_message().await?;

            let is_reply = message.kind == MessageKind::PublicKey && message.sender == username;
            let is_not_found = message.sender == SERVER_SENDER
                && message.as_text().and_then(notice::parse_user_not_found) == Some(username);

            if is_reply {
                self.active_mut()?.handle(message)?;
                return Ok(self.active()?.cached_key(username).cloned());
            }
            if is_not_found {
                return Ok(None);
            }
            self.backlog.push_back(message);
        }
    }

    /// Next event, from the queue or the stream.
    pub async fn next_event(&mut self) -> Result<ClientEvent, ClientError> {
        self.active()?;
        let message = match self.backlog.pop_front() {
            Some(message) => message,
            None => self.read_message().await?,
        };
        self.active_mut()?.handle(message)
    }

    /// Send `/disconnect`, wait for the acknowledgment, and close the stream.
    ///
    /// Events that arrive before the acknowledgment are discarded.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        let message = self.active()?.disconnect_message();
        self.writer.write_message(&message).await?;

        loop {
            if self.next_event().await? == ClientEvent::Disconnected {
                break;
            }
        }

        self.writer.shutdown().await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Message, ClientError> {
        match self.reader.read_frame().await? {
            Frame::Message(message) => Ok(message),
            Frame::Username(_) => Err(ClientError::InvalidFrame {
                reason: "server sent a username frame".to_string(),
            }),
        }
    }

    fn active(&self) -> Result<&Session, ClientError> {
        match &self.phase {
            Phase::Active(session) => Ok(session),
            _ => Err(ClientError::InvalidState { reason: "handshake not complete".to_string() }),
        }
    }

    fn active_mut(&mut self) -> Result<&mut Session, ClientError> {
        match &mut self.phase {
            Phase::Active(session) => Ok(session),
            _ => Err(ClientError::InvalidState { reason: "handshake not complete".to_string() }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::LazyLock;

    use parley_proto::KeyMap;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use tokio::io::{DuplexStream, duplex};

    use super::*;

    const MAX: usize = DEFAULT_MAX_FRAME_SIZE;

    static KEYS: LazyLock<KeyPair> =
        LazyLock::new(|| KeyPair::generate(&mut ChaCha20Rng::seed_from_u64(41), 1024).unwrap());

    /// Scripted server end of a duplex pipe.
    struct Peer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    impl Peer {
        async fn send(&mut self, message: Message) {
            self.writer.write_message(&message).await.unwrap();
        }

        async fn recv(&mut self) -> Frame {
            self.reader.read_frame().await.unwrap()
        }
    }

    async fn connected() -> (Client<DuplexStream>, Peer) {
        let (near, far) = duplex(64 * 1024);
        let (read, write) = tokio::io::split(far);
        let mut peer =
            Peer { reader: FrameReader::new(read, MAX), writer: FrameWriter::new(write, MAX) };
        peer.send(Message::notice(notice::CONNECTION_ACK)).await;

        let client = Client::from_stream(near, ClientConfig::default()).await.unwrap();
        (client, peer)
    }

    fn key_map(version: u64) -> Message {
        let mut map = KeyMap::new(version);
        map.insert("alice", &KEYS.public_key().to_der().unwrap());
        Message::key_map(&map).unwrap()
    }

    async fn active() -> (Client<DuplexStream>, Peer) {
        let (mut client, mut peer) = connected().await;
        peer.send(Message::notice(notice::username_accepted("alice"))).await;
        client.register("alice").await.unwrap();
        peer.send(key_map(1)).await;
        client.publish_key(KEYS.clone()).await.unwrap();

        assert_eq!(peer.recv().await, Frame::Username("alice".to_string()));
        let Frame::Message(published) = peer.recv().await else { panic!("expected message") };
        assert_eq!(published.kind, MessageKind::PublicKey);
        (client, peer)
    }

    #[tokio::test]
    async fn wrong_greeting_fails_handshake() {
        let (near, far) = duplex(4096);
        let (_, write) = tokio::io::split(far);
        let mut writer = FrameWriter::new(write, MAX);
        writer.write_message(&Message::notice("hello")).await.unwrap();

        let err = Client::from_stream(near, ClientConfig::default()).await.err().unwrap();
        assert!(matches!(err, ClientError::Handshake { .. }));
    }

    #[tokio::test]
    async fn register_follows_suggestions() {
        let (mut client, mut peer) = connected().await;
        peer.send(Message::notice(notice::username_taken("alice42"))).await;
        peer.send(Message::notice(notice::username_accepted("alice42"))).await;

        let name = client.register_with_retry("alice").await.unwrap();
        assert_eq!(name, "alice42");
        assert_eq!(client.username(), Some("alice42"));

        assert_eq!(peer.recv().await, Frame::Username("alice".to_string()));
        assert_eq!(peer.recv().await, Frame::Username("alice42".to_string()));
    }

    #[tokio::test]
    async fn register_gives_up_after_configured_attempts() {
        let (mut client, mut peer) = connected().await;
        for i in 0..ClientConfig::default().max_register_attempts {
            peer.send(Message::notice(notice::username_taken(&format!("alice{i}")))).await;
        }

        let err = client.register_with_retry("alice").await.unwrap_err();
        assert!(matches!(err, ClientError::RegistrationExhausted { attempts: 5 }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn rejected_username_is_reported() {
        let (mut client, mut peer) = connected().await;
        peer.send(Message::notice(notice::USERNAME_EMPTY)).await;

        let err = client.register_with_retry(" ").await.unwrap_err();
        assert!(matches!(err, ClientError::UsernameRejected { .. }));
        assert_eq!(client.username(), None);
    }

    #[tokio::test]
    async fn unavailable_username_stops_retrying() {
        let (mut client, mut peer) = connected().await;
        peer.send(Message::notice(notice::USERNAME_UNAVAILABLE)).await;

        let err = client.register_with_retry("alice").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::UsernameRejected { ref reason } if reason == notice::USERNAME_UNAVAILABLE
        ));
    }

    #[tokio::test]
    async fn publish_key_waits_for_map_and_keeps_other_messages() {
        let (mut client, mut peer) = connected().await;
        peer.send(Message::notice(notice::username_accepted("alice"))).await;
        client.register("alice").await.unwrap();

        peer.send(Message::text("bob", "early")).await;
        peer.send(key_map(4)).await;
        client.publish_key(KEYS.clone()).await.unwrap();

        let _username = peer.recv().await;
        let Frame::Message(published) = peer.recv().await else { panic!("expected message") };
        assert_eq!(published.kind, MessageKind::PublicKey);
        assert_eq!(client.session().unwrap().cache().version(), Some(4));

        assert_eq!(
            client.next_event().await.unwrap(),
            ClientEvent::Text { sender: "bob".to_string(), text: "early".to_string() }
        );
    }

    #[tokio::test]
    async fn operations_before_handshake_are_invalid() {
        let (mut client, _peer) = connected().await;
        assert!(matches!(
            client.send_text("hi").await.unwrap_err(),
            ClientError::InvalidState { .. }
        ));
        assert!(matches!(
            client.publish_key(KEYS.clone()).await.unwrap_err(),
            ClientError::InvalidState { .. }
        ));
    }

    #[tokio::test]
    async fn public_key_of_reports_unknown_user() {
        let (mut client, mut peer) = active().await;

        peer.send(Message::text("bob", "interleaved")).await;
        peer.send(Message::notice(notice::user_not_found("carol"))).await;
        assert_eq!(client.public_key_of("carol").await.unwrap(), None);

        let Frame::Message(request) = peer.recv().await else { panic!("expected message") };
        assert_eq!(request.kind, MessageKind::KeyRequest);
        assert!(matches!(client.next_event().await.unwrap(), ClientEvent::Text { .. }));
    }

    #[tokio::test]
    async fn public_key_of_uses_cache() {
        let (mut client, _peer) = active().await;
        assert_eq!(client.public_key_of("alice").await.unwrap().as_ref(), Some(KEYS.public_key()));
    }

    #[tokio::test]
    async fn disconnect_waits_for_ack() {
        let (client, mut peer) = active().await;
        peer.send(Message::text("bob", "bye")).await;
        peer.send(Message::notice(notice::DISCONNECT_ACK)).await;

        client.disconnect().await.unwrap();

        let Frame::Message(command) = peer.recv().await else { panic!("expected message") };
        assert!(command.is_disconnect_command());
        assert!(matches!(
            peer.reader.read_frame().await,
            Err(parley_proto::ProtoError::ConnectionClosed)
        ));
    }
}
