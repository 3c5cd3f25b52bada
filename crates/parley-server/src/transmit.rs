//! Outbound half of a connection.
//!
//! A [`Transmit`] is shared between the connection's own handler (replies)
//! and every other handler that broadcasts through the registry. Writes are
//! serialized per connection: at most one frame is in flight at a time.
//!
//! Closing is a signal, not a write. [`Transmit::close`] marks the handle
//! closed and wakes the owning handler, which is parked in a read; the
//! handler then runs its cleanup and calls [`Transmit::finish`] to shut the
//! stream down.

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parley_proto::{FrameWriter, Message, ProtoError};
use tokio::{
    net::tcp::OwnedWriteHalf,
    sync::{Mutex, mpsc, watch},
};

/// Outbound message channel for one connection.
#[async_trait]
pub trait Transmit: Send + Sync + 'static {
    /// Deliver one message.
    ///
    /// Fails immediately once the handle is closed.
    async fn send(&self, message: &Message) -> Result<(), ProtoError>;

    /// Mark the handle closed and wake whoever waits in [`Transmit::closed`].
    fn close(&self);

    /// Whether [`Transmit::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Resolves once the handle is closed.
    async fn closed(&self);

    /// Flush and release the underlying stream.
    async fn finish(&self);
}

/// Close flag with async wake-up.
#[derive(Debug)]
struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    fn close(&self) {
        self.tx.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close underneath us.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Transmit over the write half of a TCP stream.
#[derive(Debug)]
pub struct TcpTransmit {
    writer: Mutex<FrameWriter<OwnedWriteHalf>>,
    write_timeout: Duration,
    signal: CloseSignal,
}

impl TcpTransmit {
    /// Wrap a write half. Frames above `max_frame_size` are refused, and
    /// each send must finish within `write_timeout`.
    pub fn new(write: OwnedWriteHalf, max_frame_size: usize, write_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(FrameWriter::new(write, max_frame_size)),
            write_timeout,
            signal: CloseSignal::new(),
        }
    }
}

#[async_trait]
impl Transmit for TcpTransmit {
    async fn send(&self, message: &Message) -> Result<(), ProtoError> {
        if self.signal.is_closed() {
            return Err(ProtoError::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(self.write_timeout, writer.write_message(message)).await {
            Ok(result) => result,
            Err(_) => Err(ProtoError::WriteTimeout),
        }
    }

    fn close(&self) {
        self.signal.close();
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    async fn closed(&self) {
        self.signal.closed().await;
    }

    async fn finish(&self) {
        let mut writer = self.writer.lock().await;
        if let Ok(Err(e)) = tokio::time::timeout(self.write_timeout, writer.shutdown()).await {
            tracing::debug!("Shutdown error: {}", e);
        }
    }
}

/// In-memory transmit for tests.
///
/// Messages land in an unbounded channel. [`MemoryTransmit::set_failing`]
/// makes every later send fail as if the peer had vanished, which is how
/// tests drive broadcast pruning.
#[derive(Debug)]
pub struct MemoryTransmit {
    tx: mpsc::UnboundedSender<Message>,
    failing: AtomicBool,
    signal: CloseSignal,
}

impl MemoryTransmit {
    /// Create a transmit and the receiver that observes its output.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, failing: AtomicBool::new(false), signal: CloseSignal::new() }, rx)
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transmit for MemoryTransmit {
    async fn send(&self, message: &Message) -> Result<(), ProtoError> {
        if self.signal.is_closed() {
            return Err(ProtoError::ConnectionClosed);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProtoError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        self.tx.send(message.clone()).map_err(|_| ProtoError::ConnectionClosed)
    }

    fn close(&self) {
        self.signal.close();
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    async fn closed(&self) {
        self.signal.closed().await;
    }

    async fn finish(&self) {}
}
