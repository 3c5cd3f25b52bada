//! Fuzz target for inbound decoding
//!
//! Every byte sequence a peer can send reaches one of these decoders.
//!
//! # Invariants
//!
//! - NEVER panic on malformed CBOR, key maps, or envelopes
//! - A frame that decodes re-encodes to a body that decodes to the same frame
//! - A decoded envelope re-serializes to an envelope with the same recipients

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_crypto::Envelope;
use parley_proto::{DEFAULT_MAX_FRAME_SIZE, Frame, KeyMap, LENGTH_PREFIX_SIZE};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode_body(data) {
        if let Ok(encoded) = frame.encode(DEFAULT_MAX_FRAME_SIZE) {
            let decoded = Frame::decode_body(&encoded[LENGTH_PREFIX_SIZE..])
                .unwrap_or_else(|e| panic!("re-encoded frame failed to decode: {e}"));
            assert_eq!(decoded, frame);

            if let Frame::Message(message) = decoded {
                let _ = message.decode_key_map();
            }
        }
    }

    if let Ok(map) = KeyMap::from_payload(data) {
        let _ = map.decode_all();
    }

    if let Ok(envelope) = Envelope::from_bytes(data) {
        if let Ok(bytes) = envelope.to_bytes() {
            let again = Envelope::from_bytes(&bytes)
                .unwrap_or_else(|e| panic!("re-serialized envelope failed to parse: {e}"));
            assert!(again.recipients().eq(envelope.recipients()));
        }
    }
});
