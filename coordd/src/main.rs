//! coordd: runs one coordinator node.
//!
//! Start a first node, then join a second one to it:
//! ```bash
//! coordd --port 7001 --data-dir ./node-a
//! coordd --port 7002 --data-dir ./node-b --connect 127.0.0.1:7001
//! ```
//!
//! Lines typed on stdin are proposed as commands (`SET key value`,
//! `DEL key`). Log verbosity follows `RUST_LOG` (default `info`).

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coord_core::messages::Message;
use coord_core::shutdown;
use coord_core::state_machine::InMemoryStateMachine;
use coord_core::{NodeId, PeerInfo};
use coord_network::{register, CoordService, Hub, HubHandle, TcpConnection, TcpTransportConfig};
use coord_node::{LocalEngine, Node, NodeConfig, TaskRunner};
use coord_storage::SledLogStorage;

#[derive(Parser, Debug)]
#[command(name = "coordd", version, about = "Coordinator node for a replicated log")]
struct Args {
    /// Address of an existing node to join, e.g. 127.0.0.1:7001
    #[arg(long, env = "COORD_CONNECT")]
    connect: Option<String>,

    /// Port to listen on for peers (0 picks a free port)
    #[arg(long, default_value_t = 0, env = "COORD_PORT")]
    port: u16,

    /// Host the peer listener binds to
    #[arg(long, default_value = "127.0.0.1", env = "COORD_HOST")]
    host: String,

    /// Directory holding the log storage
    #[arg(long, default_value = "./coord_data", env = "COORD_DATA_DIR")]
    data_dir: PathBuf,

    /// Logical clock period in milliseconds
    #[arg(long, default_value_t = 100, env = "COORD_TICK_MS")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let storage = Arc::new(
        SledLogStorage::open(&args.data_dir)
            .with_context(|| format!("failed to open storage at {}", args.data_dir.display()))?,
    );
    let id = node_identity(&storage)?;

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    let local = PeerInfo::new(id, listener.local_addr()?.to_string());
    info!("Node {} listening on {}", id, local.address);

    let config =
        NodeConfig::default().with_tick_interval(Duration::from_millis(args.tick_ms.max(1)));
    let transport = TcpTransportConfig::default();
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_size);
    let (hub, hub_task) = Hub::spawn(inbound_tx.clone(), shutdown_rx.clone());
    let service = CoordService::new(local.clone(), hub.clone(), transport.clone());
    let service_task = tokio::spawn(service.serve(listener, shutdown_rx.clone()));

    let (tasks, runner) = TaskRunner::spawn(
        InMemoryStateMachine::new(),
        config.task_queue_size,
        shutdown_rx.clone(),
    );
    let engine = LocalEngine::new(id, storage.as_ref(), config.election_ticks)?;
    let node = Node::new(id, config, engine, storage, hub.clone(), inbound_rx, tasks);
    let mut node = tokio::spawn(node.run(shutdown_rx));

    if let Some(addr) = &args.connect {
        join(&hub, addr, local, &transport).await?;
    }
    read_proposals(id, inbound_tx);

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("Shutting down node {}", id);
            None
        }
        outcome = &mut node => Some(outcome),
    };
    let _ = shutdown_tx.send(true);
    let outcome = match finished {
        Some(outcome) => outcome,
        None => node.await,
    };

    let state_machine = runner.await.context("task pipeline panicked")?;
    let _ = hub_task.await;
    let _ = service_task.await;

    outcome
        .context("coordination loop panicked")?
        .context("coordination loop failed")?;
    info!(
        "Node {} stopped at applied index {}",
        id, state_machine.applied_index
    );
    Ok(())
}

/// Reuses the stored node id, or generates and persists a new one.
fn node_identity(storage: &SledLogStorage) -> Result<NodeId> {
    if let Some(id) = storage.node_id()? {
        return Ok(id);
    }
    let id = NodeId(rand::thread_rng().gen_range(1..=u64::MAX));
    storage.set_node_id(id)?;
    info!("Generated node id {}", id);
    Ok(id)
}

async fn join(
    hub: &HubHandle,
    addr: &str,
    local: PeerInfo,
    transport: &TcpTransportConfig,
) -> Result<()> {
    let (server, peers) = register(addr, local.clone(), transport)
        .await
        .with_context(|| format!("failed to register with {}", addr))?;
    info!(
        "Registered with node {} at {} ({} peers listed)",
        server.id,
        addr,
        peers.peers.len()
    );
    hub.add_client(server.id, TcpConnection::new(addr, local, transport.clone()))
        .await?;
    Ok(())
}

/// Proposes every non-empty stdin line. Runs on a plain thread so a pending
/// read never holds up runtime shutdown.
fn read_proposals(id: NodeId, inbound: mpsc::Sender<Message>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            };
            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            let proposal = Message::propose(id, [Bytes::from(command.to_string())]);
            if inbound.blocking_send(proposal).is_err() {
                break;
            }
        }
    });
}
