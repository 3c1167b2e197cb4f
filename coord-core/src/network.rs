use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Send side of a bidirectional frame stream.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Bytes) -> Result<()>;
}

/// Receive side of a bidirectional frame stream.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the remote end closed the stream cleanly.
    async fn recv(&mut self) -> Result<Option<Bytes>>;
}

/// A dialed connection to a peer on which streaming calls can be opened.
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    /// Opens an outbound bidirectional frame stream.
    async fn open_stream(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}
