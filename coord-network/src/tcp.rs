//! TCP transport for peer streams and the membership call.
//!
//! Every TCP connection starts with a call header frame naming the call and
//! describing the caller. The server answers with its own [`PeerInfo`], so
//! the dialer learns which node it reached.
//!
//! - `EmitRaftStep`: bidirectional stream of protocol frames, one frame per
//!   message, in both directions until either side closes.
//! - `Register`: unary membership call answered with a [`PeerInfoList`].
//!
//! Frames are a big-endian `u32` length followed by the payload.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use coord_core::network::{FrameSink, FrameSource, PeerConnection};
use coord_core::serialization::{BinarySerializer, MessageSerializer};
use coord_core::shutdown;
use coord_core::{CoordError, PeerInfo, PeerInfoList, Result};

use crate::hub::HubHandle;

/// Configuration for the TCP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// Timeout for establishing a connection and exchanging call headers
    pub connect_timeout: Duration,
    /// Maximum frame payload size (in bytes)
    pub max_frame_size: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_frame_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// First frame of every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallHeader {
    EmitRaftStep(PeerInfo),
    Register(PeerInfo),
}

async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame_size: usize) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    if payload.len() > max_frame_size {
        return Err(CoordError::network(format!(
            "Message too large: {} bytes",
            payload.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    writer
        .write_all(&buf)
        .await
        .map_err(|e| CoordError::network(format!("Failed to write frame: {}", e)))
}

/// Reads one frame. `None` means the stream ended cleanly on a frame
/// boundary.
async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Bytes>>
where
    R: AsyncReadExt + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let read = reader
            .read(&mut header[filled..])
            .await
            .map_err(|e| CoordError::network(format!("Failed to read frame length: {}", e)))?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(CoordError::network(format!(
                "Stream ended inside a frame header after {} bytes",
                filled
            )));
        }
        filled += read;
    }
    let length = u32::from_be_bytes(header) as usize;

    if length > max_frame_size {
        return Err(CoordError::network(format!(
            "Frame too large: {} bytes",
            length
        )));
    }

    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| CoordError::network(format!("Failed to read frame payload: {}", e)))?;
    Ok(Some(Bytes::from(payload)))
}

async fn write_record<W, T>(writer: &mut W, record: &T, max_frame_size: usize) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let payload = BinarySerializer.serialize(record)?;
    write_frame(writer, &payload, max_frame_size).await
}

async fn read_record<R, T>(reader: &mut R, max_frame_size: usize) -> Result<T>
where
    R: AsyncReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    match read_frame(reader, max_frame_size).await? {
        Some(frame) => BinarySerializer.deserialize(&frame),
        None => Err(CoordError::network("Connection closed during handshake")),
    }
}

pub struct TcpFrameSink {
    writer: OwnedWriteHalf,
    max_frame_size: usize,
}

#[async_trait]
impl FrameSink for TcpFrameSink {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        write_frame(&mut self.writer, &frame, self.max_frame_size).await
    }
}

pub struct TcpFrameSource {
    reader: OwnedReadHalf,
    max_frame_size: usize,
}

#[async_trait]
impl FrameSource for TcpFrameSource {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        read_frame(&mut self.reader, self.max_frame_size).await
    }
}

fn split(stream: TcpStream, max_frame_size: usize) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
    let (reader, writer) = stream.into_split();
    (
        Box::new(TcpFrameSink {
            writer,
            max_frame_size,
        }),
        Box::new(TcpFrameSource {
            reader,
            max_frame_size,
        }),
    )
}

/// Dials `addr` and performs the call header exchange, returning the
/// stream and the server's self-description.
async fn call(
    addr: &str,
    header: &CallHeader,
    config: &TcpTransportConfig,
) -> Result<(TcpStream, PeerInfo)> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| CoordError::network(format!("Failed to connect to {}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| CoordError::network(format!("Failed to configure socket: {}", e)))?;
        write_record(&mut stream, header, config.max_frame_size).await?;
        let server: PeerInfo = read_record(&mut stream, config.max_frame_size).await?;
        Ok::<_, CoordError>((stream, server))
    };

    timeout(config.connect_timeout, exchange)
        .await
        .map_err(|_| CoordError::network(format!("Connection to {} timed out", addr)))?
}

/// Calls `Register` on the node at `addr`. Returns the server's identity and
/// the peer list it answered with.
///
/// Membership is static: servers currently answer with an empty list, and
/// callers must tolerate that.
pub async fn register(
    addr: &str,
    local: PeerInfo,
    config: &TcpTransportConfig,
) -> Result<(PeerInfo, PeerInfoList)> {
    let (mut stream, server) = call(addr, &CallHeader::Register(local), config).await?;
    let peers: PeerInfoList = timeout(
        config.connect_timeout,
        read_record(&mut stream, config.max_frame_size),
    )
    .await
    .map_err(|_| CoordError::network(format!("Register call to {} timed out", addr)))??;

    debug!(
        "Node {} at {} returned {} peers",
        server.id,
        addr,
        peers.peers.len()
    );
    Ok((server, peers))
}

/// Outbound connection to a peer; each opened stream is an `EmitRaftStep`
/// call.
#[derive(Debug, Clone)]
pub struct TcpConnection {
    addr: String,
    local: PeerInfo,
    config: TcpTransportConfig,
}

impl TcpConnection {
    pub fn new(addr: impl Into<String>, local: PeerInfo, config: TcpTransportConfig) -> Self {
        Self {
            addr: addr.into(),
            local,
            config,
        }
    }
}

#[async_trait]
impl PeerConnection for TcpConnection {
    async fn open_stream(&self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let header = CallHeader::EmitRaftStep(self.local.clone());
        let (stream, server) = call(&self.addr, &header, &self.config).await?;
        debug!("Opened stream to node {} at {}", server.id, self.addr);
        Ok(split(stream, self.config.max_frame_size))
    }
}

/// Listener-side service: accepts connections and dispatches them by call
/// header. Accepted `EmitRaftStep` streams are registered with the hub.
#[derive(Clone)]
pub struct CoordService {
    local: PeerInfo,
    hub: HubHandle,
    config: TcpTransportConfig,
}

impl CoordService {
    pub fn new(local: PeerInfo, hub: HubHandle, config: TcpTransportConfig) -> Self {
        Self { local, hub, config }
    }

    /// Accepts connections until shutdown is requested.
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        match listener.local_addr() {
            Ok(addr) => info!("Node {} serving peers on {}", self.local.id, addr),
            Err(e) => warn!("Serving peers on an unknown address: {}", e),
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {}", addr);
                    let service = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = service.handle_connection(stream).await {
                            warn!("Failed to handle connection from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        debug!("Peer service stopped");
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let max = self.config.max_frame_size;
        let header: CallHeader = timeout(self.config.connect_timeout, read_record(&mut stream, max))
            .await
            .map_err(|_| CoordError::network("Timed out waiting for call header"))??;
        write_record(&mut stream, &self.local, max).await?;

        match header {
            CallHeader::EmitRaftStep(peer) => {
                let _ = stream.set_nodelay(true);
                let (sink, source) = split(stream, max);
                self.hub.add_server_stream(peer.id, sink, source).await
            }
            CallHeader::Register(peer) => {
                info!("Node {} at {} registered", peer.id, peer.address);
                write_record(&mut stream, &PeerInfoList::default(), max).await
            }
        }
    }
}
