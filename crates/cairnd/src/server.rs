//! Peer server — answers block requests from other nodes.
//!
//! One handler per accepted connection, strict request/response: every
//! fully received request gets exactly one response frame before the next
//! request is read, so the peer can never deadlock waiting on us. Before
//! serving, every byte in the requested range is run through the blocking
//! corrector — a node never forwards data it knows to be wrong. Anything
//! it cannot serve gets the null sentinel; the connection stays open.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::TcpStream;
use zerocopy::FromBytes;

use cairn_core::wire::BlockRequest;
use cairn_core::ByteStore;

use crate::corrector::Corrector;
use crate::frame;

pub async fn handle_peer(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<ByteStore>,
    corrector: Arc<Corrector>,
) {
    match serve(stream, &store, &corrector).await {
        Ok(()) => tracing::debug!(%peer, "peer connection closed"),
        Err(e) => tracing::warn!(%peer, error = %e, "peer connection failed"),
    }
}

async fn serve(mut stream: TcpStream, store: &ByteStore, corrector: &Corrector) -> Result<()> {
    loop {
        let Some(payload) = frame::read_frame(&mut stream).await? else {
            // End-of-stream between frames: the peer is done with us.
            return Ok(());
        };
        match respond(&payload, store, corrector).await {
            Some(data) => frame::write_frame(&mut stream, &data).await?,
            None => frame::write_null(&mut stream).await?,
        }
    }
}

/// Build the response for one request frame, or `None` for the null
/// sentinel: unparseable request, out-of-range request, or a byte that
/// could not be corrected.
async fn respond(payload: &[u8], store: &ByteStore, corrector: &Corrector) -> Option<Bytes> {
    let Some(request) = BlockRequest::read_from(payload) else {
        tracing::warn!(len = payload.len(), "unparseable request frame");
        return None;
    };
    let Some(range) = request.range() else {
        let (start, length) = (request.start_index, request.length);
        tracing::warn!(start_index = start, length, "out-of-range request");
        return None;
    };

    // Blocking local repair first: anything suspect is fixed via peer
    // majority before it leaves this node.
    for index in range.clone() {
        if !corrector.correct(index).await {
            tracing::warn!(index, "correction failed, refusing to serve the block");
            return None;
        }
    }

    let mut data = BytesMut::with_capacity(range.len());
    for index in range {
        data.put_u8(store.get(index).value());
    }
    Some(data.freeze())
}
