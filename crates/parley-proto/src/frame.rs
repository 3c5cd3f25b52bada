//! Frame framing over byte streams.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------+------------------------------+
//! | length (u32 BE)| CBOR-encoded Frame (length B) |
//! +----------------+------------------------------+
//! ```
//!
//! The byte layout is local to this implementation. What peers agree on is
//! the frame content and its ordering.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Message, ProtoError};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound on an encoded frame body.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// One discrete unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Raw username attempt, only valid while negotiating a name.
    Username(String),
    /// Any chat or control message.
    Message(Message),
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl Frame {
    /// Encode as length prefix + CBOR body.
    pub fn encode(&self, max_frame_size: usize) -> Result<Vec<u8>, ProtoError> {
        let mut buf = vec![0u8; LENGTH_PREFIX_SIZE];
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtoError::Encode { reason: e.to_string() })?;

        let body_len = buf.len() - LENGTH_PREFIX_SIZE;
        if body_len > max_frame_size {
            return Err(ProtoError::FrameTooLarge { size: body_len, max: max_frame_size });
        }
        let prefix = u32::try_from(body_len)
            .map_err(|_| ProtoError::FrameTooLarge { size: body_len, max: max_frame_size })?;
        buf[..LENGTH_PREFIX_SIZE].copy_from_slice(&prefix.to_be_bytes());

        Ok(buf)
    }

    /// Decode a CBOR frame body (without the length prefix).
    pub fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        ciborium::de::from_reader(body).map_err(|e| ProtoError::Decode { reason: e.to_string() })
    }
}

/// Reads length-prefixed frames from an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self { inner, max_frame_size }
    }

    /// Read the next frame.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` if the stream ends before a length prefix
    /// - `FrameTooLarge` if the prefix exceeds the limit (nothing more is read)
    /// - `Io` if the stream ends mid-body or the read fails
    /// - `Decode` if the body is not a valid frame
    pub async fn read_frame(&mut self) -> Result<Frame, ProtoError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        match self.inner.read_exact(&mut prefix).await {
            Ok(_) => {},
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtoError::ConnectionClosed);
            },
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_frame_size {
            return Err(ProtoError::FrameTooLarge { size: len, max: self.max_frame_size });
        }

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;

        Frame::decode_body(&body)
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes length-prefixed frames to an async byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    max_frame_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W, max_frame_size: usize) -> Self {
        Self { inner, max_frame_size }
    }

    /// Encode and write one frame, then flush.
    ///
    /// Oversized frames are rejected before any byte is written.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ProtoError> {
        let buf = frame.encode(self.max_frame_size)?;
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a `Message` frame.
    pub async fn write_message(&mut self, message: &Message) -> Result<(), ProtoError> {
        // Payloads are `Bytes`; the clone is shallow.
        self.write_frame(&Frame::Message(message.clone())).await
    }

    /// Flush and shut down the write side.
    pub async fn shutdown(&mut self) -> Result<(), ProtoError> {
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[tokio::test]
    async fn frames_roundtrip_in_order() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut writer = FrameWriter::new(client, DEFAULT_MAX_FRAME_SIZE);
        let mut reader = FrameReader::new(server, DEFAULT_MAX_FRAME_SIZE);

        writer.write_frame(&Frame::Username("alice".to_string())).await.unwrap();
        writer.write_message(&Message::text("alice", "hi")).await.unwrap();
        writer.write_message(&Message::public_key("alice", vec![9u8; 294])).await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), Frame::Username("alice".to_string()));
        assert_eq!(reader.read_frame().await.unwrap(), Frame::Message(Message::text("alice", "hi")));
        match reader.read_frame().await.unwrap() {
            Frame::Message(m) => assert_eq!(m.public_key.unwrap().len(), 294),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_at_boundary_is_connection_closed() {
        let (client, server) = tokio::io::duplex(1024);
        drop(client);
        let mut reader = FrameReader::new(server, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(reader.read_frame().await, Err(ProtoError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn eof_mid_body_is_io_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(&[1, 2, 3]).await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(reader.read_frame().await, Err(ProtoError::Io(_))));
    }

    #[tokio::test]
    async fn oversized_prefix_is_rejected() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(&1_000_000u32.to_be_bytes()).await.unwrap();

        let mut reader = FrameReader::new(server, 1024);
        assert!(matches!(
            reader.read_frame().await,
            Err(ProtoError::FrameTooLarge { size: 1_000_000, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn garbage_body_is_decode_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(&3u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0xFF, 0xFF, 0xFF]).await.unwrap();

        let mut reader = FrameReader::new(server, DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(reader.read_frame().await, Err(ProtoError::Decode { .. })));
    }

    #[test]
    fn encode_rejects_oversized_frame() {
        let frame = Frame::Message(Message::encrypted("a", vec![0u8; 2048]));
        assert!(matches!(frame.encode(1024), Err(ProtoError::FrameTooLarge { max: 1024, .. })));
    }

    #[test]
    fn length_prefix_matches_body() {
        let buf = Frame::Username("bob".to_string()).encode(DEFAULT_MAX_FRAME_SIZE).unwrap();
        let declared = u32::from_be_bytes(buf[..LENGTH_PREFIX_SIZE].try_into().unwrap()) as usize;
        assert_eq!(declared, buf.len() - LENGTH_PREFIX_SIZE);
        assert_eq!(
            Frame::decode_body(&buf[LENGTH_PREFIX_SIZE..]).unwrap(),
            Frame::Username("bob".to_string())
        );
    }

    fn frame() -> impl Strategy<Value = Frame> {
        let name = "[a-z0-9-]{1,16}";
        let bytes = prop::collection::vec(any::<u8>(), 0..512);
        prop_oneof![
            "\\PC{0,40}".prop_map(Frame::Username),
            (name, "\\PC{0,200}")
                .prop_map(|(sender, text)| Frame::Message(Message::text(sender, text))),
            (name, bytes.clone())
                .prop_map(|(sender, body)| Frame::Message(Message::encrypted(sender, body))),
            (name, bytes)
                .prop_map(|(sender, key)| Frame::Message(Message::public_key(sender, key))),
            (name, name)
                .prop_map(|(sender, user)| Frame::Message(Message::key_request(sender, user))),
            name.prop_map(|sender| Frame::Message(Message::key_map_request(sender))),
        ]
    }

    proptest! {
        #[test]
        fn prop_encoded_frame_decodes_to_itself(frame in frame()) {
            let buf = frame.encode(DEFAULT_MAX_FRAME_SIZE).unwrap();
            let declared = u32::from_be_bytes(buf[..LENGTH_PREFIX_SIZE].try_into().unwrap());
            prop_assert_eq!(declared as usize, buf.len() - LENGTH_PREFIX_SIZE);
            prop_assert_eq!(Frame::decode_body(&buf[LENGTH_PREFIX_SIZE..]).unwrap(), frame);
        }

        #[test]
        fn prop_arbitrary_body_never_panics(body in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = Frame::decode_body(&body);
        }
    }
}
