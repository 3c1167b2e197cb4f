//! # Peer Transport Hub
//!
//! A single actor owns the live peer set. Every operation on it (adding an
//! outbound peer, registering an accepted stream, removing a peer,
//! broadcasting) is an action enqueued to the actor through a [`HubHandle`],
//! so the peer map is never shared between tasks.
//!
//! The actor itself never waits on the network. Each registered peer gets a
//! receive task that decodes inbound frames into the shared inbound queue,
//! and a writer task draining a bounded outbound queue into the peer's sink.
//! Broadcast only enqueues; a peer whose queue is full is dropped. Outbound
//! dials run in their own tasks and register the stream once it is open.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use coord_core::messages::Message;
use coord_core::network::{FrameSink, FrameSource, PeerConnection};
use coord_core::serialization::{decode_message, encode_message};
use coord_core::shutdown;
use coord_core::{CoordError, NodeId, Result};

/// Default capacity of the hub's action queue.
pub const DEFAULT_ACTION_QUEUE: usize = 256;

/// Default number of frames buffered per peer before it is considered
/// stalled and dropped.
pub const DEFAULT_PEER_QUEUE: usize = 128;

/// Identifies one registration of a peer. Re-registering the same id bumps
/// the generation, so a task from an older registration can only release
/// its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PeerTicket {
    id: NodeId,
    generation: u64,
}

enum HubAction {
    AddClient {
        id: NodeId,
        connection: Arc<dyn PeerConnection>,
    },
    /// A stream opened by the hub's own dial task, or accepted by a server.
    Register {
        id: NodeId,
        sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
    },
    Remove {
        id: NodeId,
    },
    Release(PeerTicket),
    Send(Message),
    Peers(oneshot::Sender<Vec<NodeId>>),
}

/// Cloneable handle used to enqueue actions to the hub actor.
#[derive(Clone)]
pub struct HubHandle {
    actions: mpsc::Sender<HubAction>,
}

impl HubHandle {
    async fn enqueue(&self, action: HubAction) -> Result<()> {
        self.actions
            .send(action)
            .await
            .map_err(|_| CoordError::Shutdown)
    }

    /// Opens an outbound stream on `connection` in the background and
    /// registers it as peer `id` once open. A failed dial is logged and the
    /// peer is never registered.
    pub async fn add_client<C: PeerConnection>(&self, id: NodeId, connection: C) -> Result<()> {
        self.enqueue(HubAction::AddClient {
            id,
            connection: Arc::new(connection),
        })
        .await
    }

    /// Registers an already-accepted inbound stream as peer `id`.
    pub async fn add_server_stream(
        &self,
        id: NodeId,
        sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
    ) -> Result<()> {
        self.enqueue(HubAction::Register { id, sink, source }).await
    }

    pub async fn remove(&self, id: NodeId) -> Result<()> {
        self.enqueue(HubAction::Remove { id }).await
    }

    /// Broadcasts `message` to every registered peer. Per-peer failures are
    /// not reported; failing peers are dropped from the hub.
    pub async fn send_message(&self, message: Message) -> Result<()> {
        self.enqueue(HubAction::Send(message)).await
    }

    /// Ids of the currently registered peers, sorted.
    pub async fn peers(&self) -> Result<Vec<NodeId>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(HubAction::Peers(tx)).await?;
        rx.await.map_err(|_| CoordError::Shutdown)
    }

    async fn release(&self, ticket: PeerTicket) {
        // The hub is gone on shutdown, nothing left to release then.
        let _ = self.actions.send(HubAction::Release(ticket)).await;
    }
}

struct Peer {
    generation: u64,
    outbound: mpsc::Sender<Bytes>,
    receiver: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Peer {
    fn close(self) {
        self.receiver.abort();
        self.writer.abort();
    }
}

/// The hub actor. Construct and start it with [`Hub::spawn`].
pub struct Hub {
    peers: HashMap<NodeId, Peer>,
    next_generation: u64,
    peer_queue: usize,
    actions: mpsc::Receiver<HubAction>,
    handle: HubHandle,
    inbound: mpsc::Sender<Message>,
    shutdown: watch::Receiver<bool>,
}

impl Hub {
    /// Starts the hub actor. Decoded inbound messages from every peer are
    /// delivered to `inbound`. The actor and all peer tasks stop once
    /// `shutdown` turns true.
    pub fn spawn(
        inbound: mpsc::Sender<Message>,
        shutdown: watch::Receiver<bool>,
    ) -> (HubHandle, JoinHandle<()>) {
        Self::spawn_with_capacity(inbound, shutdown, DEFAULT_ACTION_QUEUE, DEFAULT_PEER_QUEUE)
    }

    pub fn spawn_with_capacity(
        inbound: mpsc::Sender<Message>,
        shutdown: watch::Receiver<bool>,
        action_queue: usize,
        peer_queue: usize,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(action_queue.max(1));
        let handle = HubHandle { actions: tx };
        let hub = Hub {
            peers: HashMap::new(),
            next_generation: 0,
            peer_queue: peer_queue.max(1),
            actions: rx,
            handle: handle.clone(),
            inbound,
            shutdown,
        };
        (handle, tokio::spawn(hub.run()))
    }

    async fn run(mut self) {
        debug!("Peer transport hub started");
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                action = self.actions.recv() => match action {
                    Some(action) => self.handle(action),
                    None => break,
                },
            }
        }

        for (id, peer) in self.peers.drain() {
            debug!("Closing peer {}", id);
            peer.close();
        }
        info!("Peer transport hub stopped");
    }

    fn handle(&mut self, action: HubAction) {
        match action {
            HubAction::AddClient { id, connection } => {
                tokio::spawn(dial(
                    id,
                    connection,
                    self.handle.clone(),
                    self.shutdown.clone(),
                ));
            }
            HubAction::Register { id, sink, source } => {
                self.register(id, sink, source);
                info!("Registered stream for peer {}", id);
            }
            HubAction::Remove { id } => {
                if self.deregister(id) {
                    info!("Removed peer {}", id);
                }
            }
            HubAction::Release(ticket) => {
                let current = self.peers.get(&ticket.id).map(|peer| peer.generation);
                if current == Some(ticket.generation) {
                    self.deregister(ticket.id);
                    info!("Peer {} disconnected", ticket.id);
                }
            }
            HubAction::Send(message) => self.broadcast(message),
            HubAction::Peers(reply) => {
                let mut ids: Vec<NodeId> = self.peers.keys().copied().collect();
                ids.sort();
                let _ = reply.send(ids);
            }
        }
    }

    fn register(&mut self, id: NodeId, sink: Box<dyn FrameSink>, source: Box<dyn FrameSource>) {
        self.next_generation += 1;
        let ticket = PeerTicket {
            id,
            generation: self.next_generation,
        };
        let (outbound, queue) = mpsc::channel(self.peer_queue);
        let receiver = tokio::spawn(forward_frames(
            ticket,
            source,
            self.inbound.clone(),
            self.handle.clone(),
            self.shutdown.clone(),
        ));
        let writer = tokio::spawn(write_frames(
            ticket,
            sink,
            queue,
            self.handle.clone(),
            self.shutdown.clone(),
        ));

        let peer = Peer {
            generation: ticket.generation,
            outbound,
            receiver,
            writer,
        };
        if let Some(previous) = self.peers.insert(id, peer) {
            debug!("Replacing existing registration for peer {}", id);
            previous.close();
        }
    }

    fn deregister(&mut self, id: NodeId) -> bool {
        match self.peers.remove(&id) {
            Some(peer) => {
                peer.close();
                true
            }
            None => false,
        }
    }

    fn broadcast(&mut self, message: Message) {
        let frame = match encode_message(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unencodable {:?} message: {}", message.msg_type, e);
                return;
            }
        };

        let failed: Vec<NodeId> = self
            .peers
            .iter()
            .filter_map(|(id, peer)| match peer.outbound.try_send(frame.clone()) {
                Ok(()) => None,
                Err(TrySendError::Full(_)) => {
                    warn!("Peer {} is not keeping up, dropping it", id);
                    Some(*id)
                }
                Err(TrySendError::Closed(_)) => Some(*id),
            })
            .collect();

        for id in failed {
            self.deregister(id);
            info!("Dropped unreachable peer {}", id);
        }
    }
}

/// Opens the outbound stream of an `AddClient` action.
async fn dial(
    id: NodeId,
    connection: Arc<dyn PeerConnection>,
    hub: HubHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let opened = tokio::select! {
        _ = shutdown::requested(&mut shutdown) => return,
        opened = connection.open_stream() => opened,
    };
    match opened {
        Ok((sink, source)) => {
            debug!("Opened stream to peer {}", id);
            let _ = hub.enqueue(HubAction::Register { id, sink, source }).await;
        }
        Err(e) => warn!("Failed to open stream to peer {}: {}", id, e),
    }
}

/// Send loop of one peer registration.
async fn write_frames(
    ticket: PeerTicket,
    mut sink: Box<dyn FrameSink>,
    mut queue: mpsc::Receiver<Bytes>,
    hub: HubHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown::requested(&mut shutdown) => return,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };
        let sent = tokio::select! {
            _ = shutdown::requested(&mut shutdown) => return,
            sent = sink.send(frame) => sent,
        };
        if let Err(e) = sent {
            debug!("Send to peer {} failed: {}", ticket.id, e);
            break;
        }
    }

    hub.release(ticket).await;
}

/// Receive loop of one peer registration.
async fn forward_frames(
    ticket: PeerTicket,
    mut source: Box<dyn FrameSource>,
    inbound: mpsc::Sender<Message>,
    hub: HubHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown::requested(&mut shutdown) => return,
            frame = source.recv() => frame,
        };

        match frame {
            Ok(Some(frame)) => match decode_message(&frame) {
                Ok(message) => {
                    let delivered = tokio::select! {
                        _ = shutdown::requested(&mut shutdown) => return,
                        sent = inbound.send(message) => sent.is_ok(),
                    };
                    if !delivered {
                        debug!("Inbound queue closed, stopping receive from {}", ticket.id);
                        return;
                    }
                }
                Err(e) => warn!("Dropping malformed frame from peer {}: {}", ticket.id, e),
            },
            Ok(None) => {
                debug!("Peer {} closed its stream", ticket.id);
                break;
            }
            Err(e) => {
                debug!("Receive from peer {} failed: {}", ticket.id, e);
                break;
            }
        }
    }

    hub.release(ticket).await;
}
