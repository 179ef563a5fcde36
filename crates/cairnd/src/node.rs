//! Node lifecycle — wires the store, directory, bootstrap, scanners,
//! console, and peer server together.
//!
//! Startup order matters: bind first (port 0 resolves here), register
//! with the directory, fill the store (seed file or bootstrap), then
//! start the background tasks and accept peers. Any failure before the
//! accept loop is fatal; once accepting, a handler failure is contained
//! to its connection.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;

use cairn_core::config::{read_seed_file, NodeConfig};
use cairn_core::wire::BlockRequest;
use cairn_core::{ByteStore, BLOCK_LEN, DATA_SIZE};

use crate::console::injection_loop;
use crate::corrector::Corrector;
use crate::directory::DirectoryClient;
use crate::download::DownloadWorker;
use crate::queue::RequestQueue;
use crate::scan::scan_loop;
use crate::server::handle_peer;

/// A node that has completed startup: registered, store filled, scanners
/// and console running, listener bound. Call [`Node::serve`] to accept
/// peers.
pub struct Node {
    listener: TcpListener,
    port: u16,
    store: Arc<ByteStore>,
    corrector: Arc<Corrector>,
    directory: Arc<tokio::sync::Mutex<DirectoryClient>>,
}

impl Node {
    pub async fn start(config: NodeConfig) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.node_port))
            .await
            .with_context(|| format!("failed to bind node port {}", config.node_port))?;
        let port = listener.local_addr()?.port();

        let seeded = match &config.data_file {
            Some(path) => {
                let seed = read_seed_file(path)?;
                tracing::info!(path = %path.display(), "loaded data from file");
                Some(ByteStore::from_bytes(&seed))
            }
            None => None,
        };
        let bootstrap_needed = seeded.is_none();
        let store = Arc::new(seeded.unwrap_or_default());

        let directory =
            DirectoryClient::register(&config.directory_host, config.directory_port, port)
                .await
                .context("failed to register with the directory")?;
        let directory = Arc::new(tokio::sync::Mutex::new(directory));
        let corrector = Arc::new(Corrector::new(store.clone(), directory.clone()));

        if bootstrap_needed {
            bootstrap(&directory, &store).await?;
        }

        for id in 0..config.scanners.max(2) {
            tokio::spawn(scan_loop(
                id,
                store.clone(),
                corrector.clone(),
                config.scan_interval,
            ));
        }
        tokio::spawn(injection_loop(store.clone()));

        tracing::info!(port, "ready, listening for node connections");
        Ok(Self {
            listener,
            port,
            store,
            corrector,
            directory,
        })
    }

    /// The resolved listening port (meaningful when the config said 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn store(&self) -> Arc<ByteStore> {
        self.store.clone()
    }

    pub fn corrector(&self) -> Arc<Corrector> {
        self.corrector.clone()
    }

    /// Accept peers until ctrl-c. Handler failures are contained: the
    /// acceptor and the other handlers keep going.
    pub async fn serve(self) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "node connected");
                            tokio::spawn(handle_peer(
                                stream,
                                peer,
                                self.store.clone(),
                                self.corrector.clone(),
                            ));
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down, closing sockets");
                    self.directory.lock().await.close().await;
                    return Ok(());
                }
            }
        }
    }
}

/// Fill an empty store from the peers in the directory roster: one
/// download worker per peer, all draining a shared queue of block
/// requests. Fatal unless the queue fully drains.
async fn bootstrap(
    directory: &Arc<tokio::sync::Mutex<DirectoryClient>>,
    store: &Arc<ByteStore>,
) -> Result<()> {
    let peers = directory
        .lock()
        .await
        .nodes()
        .await
        .context("failed to fetch the peer roster")?;
    if peers.is_empty() {
        bail!("no peers available to bootstrap from");
    }

    let requests = (0..DATA_SIZE)
        .step_by(BLOCK_LEN)
        .map(|start| BlockRequest::new(start as i32, BLOCK_LEN as i32));
    let queue = Arc::new(RequestQueue::new(requests, peers.len()));
    tracing::info!(
        blocks = DATA_SIZE / BLOCK_LEN,
        peers = peers.len(),
        "bootstrapping store from peers"
    );

    for peer in peers {
        tokio::spawn(DownloadWorker::new(peer, queue.clone(), store.clone()).run());
    }

    queue.wait().await;
    if !queue.is_complete() {
        bail!("bootstrap failed: all download workers died with blocks left over");
    }
    tracing::info!("bootstrap complete");
    Ok(())
}
