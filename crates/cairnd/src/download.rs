//! Download workers — one per peer, draining the bootstrap queue.
//!
//! A worker owns exactly one long-lived connection to its assigned peer
//! and keeps at most one request in flight: send a block request, read the
//! one response, store the bytes, repeat. On the first sign of trouble
//! (socket error, bad frame, null response, wrong-size payload) the worker
//! requeues its outstanding request and exits. There are no per-peer
//! retries; liveness comes from the other workers draining what this one
//! gave back.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;
use zerocopy::AsBytes;

use cairn_core::wire::BlockRequest;
use cairn_core::{ByteStore, ParityByte};

use crate::frame;
use crate::queue::RequestQueue;

pub struct DownloadWorker {
    peer: SocketAddr,
    queue: Arc<RequestQueue>,
    store: Arc<ByteStore>,
}

impl DownloadWorker {
    pub fn new(peer: SocketAddr, queue: Arc<RequestQueue>, store: Arc<ByteStore>) -> Self {
        Self { peer, queue, store }
    }

    pub async fn run(self) {
        tracing::info!(peer = %self.peer, "download worker started");

        let mut stream = match TcpStream::connect(self.peer).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "failed to connect, worker exiting");
                self.queue.mark_worker_done();
                return;
            }
        };

        let mut fetched = 0usize;
        while let Some(request) = self.queue.take().await {
            match self.fetch(&mut stream, request).await {
                Ok(()) => {
                    fetched += 1;
                    self.queue.complete(request);
                }
                Err(e) => {
                    let start = request.start_index;
                    tracing::warn!(
                        peer = %self.peer,
                        start_index = start,
                        error = %e,
                        "transfer failed, requeueing outstanding request"
                    );
                    self.queue.requeue(request);
                    self.queue.mark_worker_done();
                    return;
                }
            }
        }

        tracing::info!(peer = %self.peer, blocks = fetched, "download worker finished");
        self.queue.mark_worker_done();
    }

    /// One strict request/response exchange: the peer answers frames in
    /// the order requests were sent, so the next frame on the connection
    /// is the answer to `request`.
    async fn fetch(&self, stream: &mut TcpStream, request: BlockRequest) -> Result<()> {
        let range = request
            .range()
            .context("refusing to send an out-of-range request")?;

        frame::write_frame(stream, request.as_bytes())
            .await
            .context("failed to send block request")?;

        let payload = frame::read_frame(stream)
            .await
            .context("failed to read block response")?
            .context("peer closed before responding")?;

        if payload.is_empty() {
            bail!("peer answered with the null sentinel");
        }
        if payload.len() != range.len() {
            bail!(
                "peer answered {} bytes for a {}-byte block",
                payload.len(),
                range.len()
            );
        }

        // Parity is recomputed on receipt: the wire carries only the data
        // bits, so every stored byte re-enters the store parity-valid.
        for (index, &value) in range.zip(payload.iter()) {
            self.store.set(index, ParityByte::new(value));
        }
        Ok(())
    }
}
