//! Fuzz target for the [`ConnectionHandler`] state machine
//!
//! Prevent registration bypass and double announcements via arbitrary frame
//! sequences.
//!
//! # Strategy
//!
//! - Event sequences: Arbitrary mixes of username attempts, keys, chat
//!   frames, the disconnect command, and raw undecodable bodies
//! - Out-of-order handshakes: Keys before usernames, usernames after keys
//! - Second participant: An already active peer observes every broadcast
//!
//! # Invariants
//!
//! - Handler ALWAYS terminates once input ends
//! - Registry holds only the observer after the handler closes
//! - Acknowledgment is the first thing the handler sends
//! - At most one disconnect acknowledgment, and only on a graceful close
//! - Observer sees at most one departure notice for the fuzzed user
//! - `Evicted` and `Shutdown` are never the close reason here

#![no_main]

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use parley_crypto::KeyPair;
use parley_proto::{
    DEFAULT_MAX_FRAME_SIZE, DISCONNECT_COMMAND, Frame, FrameReader, LENGTH_PREFIX_SIZE, Message,
    SERVER_SENDER, notice,
};
use parley_server::{
    CloseReason, ConnectionHandler, ConnectionRegistry, HandlerConfig, MemoryTransmit, SystemEnv,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::io::AsyncWriteExt;

const OBSERVER: &str = "observer";
const OBSERVER_ID: u64 = 1;
const FUZZED_ID: u64 = 2;

static KEY_DER: LazyLock<Vec<u8>> = LazyLock::new(|| {
    KeyPair::generate(&mut ChaCha20Rng::seed_from_u64(0), 1024)
        .and_then(|pair| pair.public_key().to_der())
        .unwrap_or_default()
});

#[derive(Debug, Clone, Arbitrary)]
enum FuzzEvent {
    Username(String),
    ValidKey { claimed_sender: String },
    GarbageKey(Vec<u8>),
    Text(String),
    Disconnect,
    Encrypted(Vec<u8>),
    KeyRequest(String),
    KeyMapRequest,
    RawBody(Vec<u8>),
}

fn encode(event: &FuzzEvent) -> Vec<u8> {
    let frame = match event {
        FuzzEvent::Username(name) => Frame::Username(name.clone()),
        FuzzEvent::ValidKey { claimed_sender } => {
            Frame::Message(Message::public_key(claimed_sender.clone(), KEY_DER.clone()))
        },
        FuzzEvent::GarbageKey(bytes) => {
            Frame::Message(Message::public_key("fuzz", bytes.clone()))
        },
        FuzzEvent::Text(text) => Frame::Message(Message::text("fuzz", text.clone())),
        FuzzEvent::Disconnect => Frame::Message(Message::text("fuzz", DISCONNECT_COMMAND)),
        FuzzEvent::Encrypted(blob) => Frame::Message(Message::encrypted("fuzz", blob.clone())),
        FuzzEvent::KeyRequest(name) => Frame::Message(Message::key_request("fuzz", name.clone())),
        FuzzEvent::KeyMapRequest => Frame::Message(Message::key_map_request("fuzz")),
        FuzzEvent::RawBody(body) => {
            let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
            let mut raw = len.to_be_bytes().to_vec();
            raw.extend_from_slice(body);
            return raw;
        },
    };
    frame.encode(DEFAULT_MAX_FRAME_SIZE).unwrap_or_else(|_| vec![0; LENGTH_PREFIX_SIZE])
}

fuzz_target!(|events: Vec<FuzzEvent>| {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_time().build() else {
        return;
    };

    runtime.block_on(async move {
        let registry = Arc::new(ConnectionRegistry::<MemoryTransmit>::new());

        let (observer, mut observed) = MemoryTransmit::channel();
        assert!(registry.try_register(OBSERVER, OBSERVER_ID, Arc::new(observer)));
        registry
            .attach_public_key(OBSERVER, OBSERVER_ID, Bytes::from(KEY_DER.clone()))
            .unwrap_or_else(|e| panic!("observer key rejected: {e}"));
        registry
            .activate(OBSERVER, OBSERVER_ID)
            .unwrap_or_else(|e| panic!("observer not activated: {e}"));

        let (client, server) = tokio::io::duplex(DEFAULT_MAX_FRAME_SIZE);
        let (transmit, mut sent) = MemoryTransmit::channel();
        let handler = ConnectionHandler::new(
            FUZZED_ID,
            FrameReader::new(server, DEFAULT_MAX_FRAME_SIZE),
            Arc::new(transmit),
            Arc::clone(&registry),
            SystemEnv::new(),
            HandlerConfig { max_username_len: 16 },
        );
        let task = tokio::spawn(handler.run());

        let mut client = client;
        for event in &events {
            if client.write_all(&encode(event)).await.is_err() {
                break;
            }
        }
        drop(client);

        let reason = tokio::time::timeout(Duration::from_secs(30), task)
            .await
            .unwrap_or_else(|_| panic!("handler did not terminate"))
            .unwrap_or_else(|e| panic!("handler task failed: {e}"));

        assert!(!matches!(reason, CloseReason::Evicted | CloseReason::Shutdown));
        assert_eq!(registry.active_count(), 1);
        assert!(registry.contains(OBSERVER));

        let mut replies = Vec::new();
        while let Ok(message) = sent.try_recv() {
            replies.push(message);
        }
        assert_eq!(replies.first().and_then(Message::as_text), Some(notice::CONNECTION_ACK));

        let acks = replies
            .iter()
            .filter(|m| m.sender == SERVER_SENDER && m.as_text() == Some(notice::DISCONNECT_ACK))
            .count();
        assert!(acks <= 1);
        if acks == 1 {
            assert_eq!(reason, CloseReason::Graceful);
        }

        let mut departures = 0;
        while let Ok(message) = observed.try_recv() {
            if message.sender == SERVER_SENDER {
                let text = message.as_text().unwrap_or_default();
                if text.ends_with(" has left the chat.") || text.ends_with(" lost connection.") {
                    departures += 1;
                }
            }
        }
        assert!(departures <= 1);
    });
});
