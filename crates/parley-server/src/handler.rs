//! Per-connection state machine.
//!
//! ## States
//!
//! ```text
//! Connected ──ack──► AwaitingUsername ──accepted──► AwaitingPublicKey
//!                        │    ▲                          │
//!                        └────┘ empty / taken            │ valid PublicKey
//!                                                        ▼
//!                     Closed ◄──── /disconnect ───────  Active ◄─┐
//!                       ▲          read failure           │     │ routed frames
//!                       └──────── protocol violation ◄────┴─────┘
//! ```
//!
//! Every state has one handler method that consumes a frame and returns an
//! [`Outcome`]. Reaching `Closed` always goes through [`ConnectionHandler::close`],
//! which runs the cleanup exactly once: deregister, announce the departure
//! if this connection's entry was active, release the transport.
//!
//! The handler also watches its own transmit and the registry's shutdown
//! signal. When the registry closes the transmit (failed broadcast write)
//! or shuts down, the pending read is abandoned and the handler moves
//! straight to `Closed`. The shutdown signal reaches handlers that never
//! registered a username.
//!
//! ## Joining
//!
//! A valid public key moves the registry entry to Joining. The newcomer's
//! first key map is sent while the entry is still invisible to broadcasts,
//! so no other map can overtake it. The entry is then activated, the
//! newcomer gets the map at the activation version, and the rest of the
//! room learns about it. Any map another handler delivers afterwards either
//! carries an older version or already includes the newcomer.

use std::sync::Arc;

use parley_crypto::PublicKey;
use parley_proto::{Frame, FrameReader, KeyMap, Message, MessageKind, notice};
use tokio::{io::AsyncRead, sync::watch};

use crate::{
    error::HandlerError,
    registry::{ConnectionId, ConnectionRegistry, Departure, EntryState},
    router::{self, RouteAction},
    system_env::Environment,
    transmit::Transmit,
    username,
};

/// Bounds the connection-derived suffix used when every random suggestion
/// is taken.
const FALLBACK_SUFFIX_RANGE: u64 = 1_000_000;

/// Registration state of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted; acknowledgment not yet sent.
    Connected,
    /// Negotiating a unique username.
    AwaitingUsername,
    /// Username reserved; the next frame must be a public key.
    AwaitingPublicKey {
        /// Reserved username.
        username: String,
    },
    /// Handshake complete.
    Active {
        /// Registered username.
        username: String,
    },
    /// Terminal.
    Closed,
}

impl ConnectionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::AwaitingUsername => "AwaitingUsername",
            Self::AwaitingPublicKey { .. } => "AwaitingPublicKey",
            Self::Active { .. } => "Active",
            Self::Closed => "Closed",
        }
    }
}

/// Result of handling one frame.
#[derive(Debug)]
pub enum Outcome {
    /// Keep reading.
    Continue,
    /// Peer asked to leave.
    GracefulClose,
    /// Connection cannot continue.
    Fatal(HandlerError),
}

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent `/disconnect`.
    Graceful,
    /// Peer sent a frame not allowed in its state.
    ProtocolViolation,
    /// Read or write failed.
    TransportFailure,
    /// Registry pruned this connection after a failed write.
    Evicted,
    /// Server is shutting down.
    Shutdown,
}

impl CloseReason {
    fn departure(self) -> Departure {
        match self {
            Self::Graceful => Departure::Left,
            _ => Departure::Lost,
        }
    }
}

/// Handler settings taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct HandlerConfig {
    /// Longest accepted username, in characters.
    pub max_username_len: usize,
}

/// Drives one connection from accept to close.
pub struct ConnectionHandler<R, T, E> {
    id: ConnectionId,
    reader: FrameReader<R>,
    transmit: Arc<T>,
    registry: Arc<ConnectionRegistry<T>>,
    env: E,
    config: HandlerConfig,
    state: ConnectionState,
    shutdown: watch::Receiver<bool>,
}

impl<R, T, E> ConnectionHandler<R, T, E>
where
    R: AsyncRead + Unpin + Send,
    T: Transmit,
    E: Environment,
{
    /// Create a handler for a freshly accepted connection.
    pub fn new(
        id: ConnectionId,
        reader: FrameReader<R>,
        transmit: Arc<T>,
        registry: Arc<ConnectionRegistry<T>>,
        env: E,
        config: HandlerConfig,
    ) -> Self {
        let shutdown = registry.shutdown_signal();
        Self {
            id,
            reader,
            transmit,
            registry,
            env,
            config,
            state: ConnectionState::Connected,
            shutdown,
        }
    }

    /// Run the connection to completion.
    pub async fn run(mut self) -> CloseReason {
        if let Err(e) = self.transmit.send(&Message::notice(notice::CONNECTION_ACK)).await {
            tracing::debug!(conn_id = self.id, "Failed to send ack: {}", e);
            return self.close(CloseReason::TransportFailure).await;
        }
        self.state = ConnectionState::AwaitingUsername;

        loop {
            let frame = match self.next_frame().await {
                Ok(frame) => frame,
                Err(reason) => return self.close(reason).await,
            };

            let outcome = match self.state.clone() {
                ConnectionState::AwaitingUsername => self.on_username(frame).await,
                ConnectionState::AwaitingPublicKey { username } => {
                    self.on_public_key(username, frame).await
                },
                ConnectionState::Active { username } => self.on_active(&username, frame).await,
                ConnectionState::Connected | ConnectionState::Closed => {
                    Outcome::Fatal(HandlerError::ProtocolViolation {
                        state: self.state.name(),
                        reason: "frame outside handshake".to_string(),
                    })
                },
            };

            match outcome {
                Outcome::Continue => {},
                Outcome::GracefulClose => return self.close(CloseReason::Graceful).await,
                Outcome::Fatal(e) => {
                    let reason = e.close_reason();
                    if e.is_protocol_violation() {
                        tracing::warn!(conn_id = self.id, "Closing connection: {}", e);
                    } else {
                        tracing::debug!(conn_id = self.id, "Closing connection: {}", e);
                    }
                    return self.close(reason).await;
                },
            }
        }
    }

    /// Read the next frame, or the reason the connection must close.
    async fn next_frame(&mut self) -> Result<Frame, CloseReason> {
        tokio::select! {
            biased;

            () = self.transmit.closed() => {
                if self.registry.is_shutting_down() {
                    Err(CloseReason::Shutdown)
                } else {
                    Err(CloseReason::Evicted)
                }
            },

            _ = self.shutdown.wait_for(|down| *down) => Err(CloseReason::Shutdown),

            result = self.reader.read_frame() => result.map_err(|e| {
                let error = HandlerError::from(e);
                tracing::debug!(conn_id = self.id, "Read failed: {}", error);
                error.close_reason()
            }),
        }
    }

    async fn reply(&self, text: impl Into<String>) -> Outcome {
        match self.transmit.send(&Message::notice(text)).await {
            Ok(()) => Outcome::Continue,
            Err(e) => Outcome::Fatal(e.into()),
        }
    }

    async fn on_username(&mut self, frame: Frame) -> Outcome {
        let raw = match frame {
            Frame::Username(raw) => raw,
            Frame::Message(message) => {
                return Outcome::Fatal(HandlerError::ProtocolViolation {
                    state: self.state.name(),
                    reason: format!("expected username, got {:?}", message.kind),
                });
            },
        };

        let name = match username::normalize(&raw, self.config.max_username_len) {
            Ok(name) => name,
            Err(rejection) => return self.reply(rejection.notice()).await,
        };

        let registered = !username::is_reserved(&name)
            && self.registry.try_register(&name, self.id, Arc::clone(&self.transmit));

        if !registered {
            let suggestion = username::suggest(
                &self.env,
                &name,
                self.config.max_username_len,
                self.id % FALLBACK_SUFFIX_RANGE,
                |candidate| self.registry.contains(candidate),
            );
            tracing::debug!(conn_id = self.id, username = %name, ?suggestion, "Username taken");
            return match suggestion {
                Some(suggestion) => self.reply(notice::username_taken(&suggestion)).await,
                None => self.reply(notice::USERNAME_UNAVAILABLE).await,
            };
        }

        tracing::debug!(conn_id = self.id, username = %name, "Username reserved");
        self.state = ConnectionState::AwaitingPublicKey { username: name.clone() };
        self.reply(notice::username_accepted(&name)).await
    }

    async fn on_public_key(&mut self, username: String, frame: Frame) -> Outcome {
        let key = match frame {
            Frame::Message(Message { kind: MessageKind::PublicKey, public_key: Some(key), .. }) => {
                key
            },
            Frame::Message(message) => {
                return Outcome::Fatal(HandlerError::ProtocolViolation {
                    state: self.state.name(),
                    reason: format!("expected PublicKey, got {:?}", message.kind),
                });
            },
            Frame::Username(_) => {
                return Outcome::Fatal(HandlerError::ProtocolViolation {
                    state: self.state.name(),
                    reason: "expected PublicKey, got username".to_string(),
                });
            },
        };

        if let Err(e) = PublicKey::from_der(&key) {
            return Outcome::Fatal(HandlerError::ProtocolViolation {
                state: self.state.name(),
                reason: e.to_string(),
            });
        }

        // Until activation nothing else is delivered here, so this map is
        // the first one the newcomer sees.
        let first = match self.registry.attach_public_key(&username, self.id, key) {
            Ok(map) => map,
            Err(e) => return Outcome::Fatal(e.into()),
        };
        if let Err(e) = self.send_key_map(&first).await {
            return Outcome::Fatal(e);
        }

        let current = match self.registry.activate(&username, self.id) {
            Ok(map) => map,
            Err(e) => return Outcome::Fatal(e.into()),
        };
        self.state = ConnectionState::Active { username: username.clone() };

        let key_map = match Message::key_map(&current) {
            Ok(message) => message,
            Err(e) => return Outcome::Fatal(e.into()),
        };
        if let Err(e) = self.transmit.send(&key_map).await {
            return Outcome::Fatal(e.into());
        }
        self.registry.broadcast(&key_map, Some(&username)).await;
        self.registry.broadcast(&Message::notice(notice::user_joined(&username)), None).await;

        tracing::info!(conn_id = self.id, username = %username, "User joined");
        Outcome::Continue
    }

    async fn send_key_map(&self, map: &KeyMap) -> Result<(), HandlerError> {
        let message = Message::key_map(map)?;
        self.transmit.send(&message).await?;
        Ok(())
    }

    async fn on_active(&mut self, username: &str, frame: Frame) -> Outcome {
        if let Frame::Message(message) = &frame
            && message.is_disconnect_command()
        {
            if let Err(e) = self.transmit.send(&Message::notice(notice::DISCONNECT_ACK)).await {
                tracing::debug!(conn_id = self.id, "Failed to send disconnect ack: {}", e);
            }
            return Outcome::GracefulClose;
        }

        match router::route(&self.registry, username, frame) {
            Ok(RouteAction::Broadcast { message, exclude }) => {
                tracing::debug!(username = %username, kind = ?message.kind, "Broadcast");
                self.registry.broadcast(&message, exclude.as_deref()).await;
                Outcome::Continue
            },
            Ok(RouteAction::Reply(message)) => match self.transmit.send(&message).await {
                Ok(()) => Outcome::Continue,
                Err(e) => Outcome::Fatal(e.into()),
            },
            Err(e) => Outcome::Fatal(e),
        }
    }

    /// Terminal cleanup. Runs once per connection.
    async fn close(mut self, reason: CloseReason) -> CloseReason {
        let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
        let username = match state {
            ConnectionState::AwaitingPublicKey { username }
            | ConnectionState::Active { username } => Some(username),
            _ => None,
        };

        if let Some(username) = &username {
            let removed = self.registry.deregister(username, self.id);
            if removed == Some(EntryState::Active) {
                tracing::info!(conn_id = self.id, username = %username, ?reason, "User left");
                if reason != CloseReason::Shutdown && !self.registry.is_shutting_down() {
                    self.registry.announce_departure(username, reason.departure()).await;
                }
            }
        }

        self.transmit.close();
        self.transmit.finish().await;

        tracing::debug!(conn_id = self.id, ?reason, "Connection closed");
        reason
    }
}
