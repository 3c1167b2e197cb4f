//! In-process frame transport over tokio channels.
//!
//! Behaves like a dialed stream: dropping one side's sink ends the other
//! side's source cleanly, and sending after the remote source is gone fails.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use coord_core::network::{FrameSink, FrameSource, PeerConnection};
use coord_core::{CoordError, Result};

/// Both halves of one end of a stream.
pub type StreamHalves = (Box<dyn FrameSink>, Box<dyn FrameSource>);

pub struct MemorySink {
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| CoordError::network("In-memory stream closed by peer"))
    }
}

pub struct MemorySource {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}

/// Creates a connected pair of stream ends, each buffering up to
/// `capacity` frames per direction.
pub fn stream_pair(capacity: usize) -> (StreamHalves, StreamHalves) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (
        (
            Box::new(MemorySink { tx: a_tx }),
            Box::new(MemorySource { rx: b_rx }),
        ),
        (
            Box::new(MemorySink { tx: b_tx }),
            Box::new(MemorySource { rx: a_rx }),
        ),
    )
}

/// Dialable in-memory connection. Every opened stream's far end is handed
/// to the paired [`MemoryListener`].
pub struct MemoryConnection {
    capacity: usize,
    accepted: mpsc::UnboundedSender<StreamHalves>,
}

impl MemoryConnection {
    pub fn new(capacity: usize) -> (MemoryListener, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryListener {
                accepted: Mutex::new(rx),
            },
            Self {
                capacity,
                accepted: tx,
            },
        )
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    async fn open_stream(&self) -> Result<StreamHalves> {
        let (local, remote) = stream_pair(self.capacity);
        self.accepted
            .send(remote)
            .map_err(|_| CoordError::network("In-memory listener is gone"))?;
        Ok(local)
    }
}

/// Accepting side of a [`MemoryConnection`].
pub struct MemoryListener {
    accepted: Mutex<mpsc::UnboundedReceiver<StreamHalves>>,
}

impl MemoryListener {
    /// Next stream opened by the connection, or `None` once it was dropped.
    pub async fn accept(&self) -> Option<StreamHalves> {
        self.accepted.lock().await.recv().await
    }
}
