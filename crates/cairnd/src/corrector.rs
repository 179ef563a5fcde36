//! Error corrector — repairs suspect bytes by majority vote across peers.
//!
//! A byte whose parity check fails cannot be fixed locally: the bad bit is
//! detectable but not locatable. The corrector asks every peer for its
//! copy of that single byte over a short-lived connection and commits the
//! value a strict majority of responders agree on. Ties, pluralities, no
//! responders, or an empty roster leave the byte untouched and suspect.
//!
//! Concurrent repair attempts for the same index are coalesced through a
//! ticket map guarded by one lock: whoever inserts the ticket runs the
//! peer queries, everyone else either backs off (`try_correct`) or waits
//! for the ticket to clear (`correct`). At most one ticket per index
//! exists at any instant.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use zerocopy::AsBytes;

use cairn_core::wire::BlockRequest;
use cairn_core::{ByteStore, ParityByte};

use crate::directory::DirectoryClient;
use crate::frame;

pub struct Corrector {
    store: Arc<ByteStore>,
    directory: Arc<tokio::sync::Mutex<DirectoryClient>>,
    tickets: Mutex<HashMap<usize, watch::Sender<()>>>,
}

impl Corrector {
    pub fn new(
        store: Arc<ByteStore>,
        directory: Arc<tokio::sync::Mutex<DirectoryClient>>,
    ) -> Self {
        Self {
            store,
            directory,
            tickets: Mutex::new(HashMap::new()),
        }
    }

    /// Non-blocking repair attempt.
    ///
    /// Returns false when another correction already holds the ticket for
    /// `index`, or when no strict peer majority was reached. Returns true
    /// iff the byte is parity-valid afterwards, which includes the no-op
    /// case where it already was.
    pub async fn try_correct(&self, index: usize) -> bool {
        if self.store.get(index).is_parity_ok() {
            return true;
        }
        let Ok(ticket) = self.claim(index) else {
            return false;
        };
        let repaired = self.repair_by_vote(index).await;
        drop(ticket);
        repaired
    }

    /// Whether a correction is currently in progress for `index`.
    pub fn is_correcting(&self, index: usize) -> bool {
        self.tickets.lock().contains_key(&index)
    }

    /// Blocking repair, used by the peer server before serving a byte.
    ///
    /// Parity-ok returns true immediately. Otherwise wait out any ongoing
    /// correction and re-check, or run one ourselves. False means the byte
    /// is still suspect and must not be served.
    pub async fn correct(&self, index: usize) -> bool {
        loop {
            if self.store.get(index).is_parity_ok() {
                return true;
            }
            match self.claim(index) {
                Ok(ticket) => {
                    let repaired = self.repair_by_vote(index).await;
                    drop(ticket);
                    return repaired;
                }
                Err(mut waiting) => {
                    // Woken when the ticket holder drops the sender.
                    let _ = waiting.changed().await;
                }
            }
        }
    }

    /// Insert a ticket for `index`, or hand back a subscription to the one
    /// already there. Subscribed under the map lock, so the ticket holder's
    /// removal cannot slip between lookup and wait.
    fn claim(&self, index: usize) -> Result<TicketGuard<'_>, watch::Receiver<()>> {
        let mut tickets = self.tickets.lock();
        if let Some(ticket) = tickets.get(&index) {
            return Err(ticket.subscribe());
        }
        tickets.insert(index, watch::channel(()).0);
        Ok(TicketGuard {
            tickets: &self.tickets,
            index,
        })
    }

    /// Query every peer for its copy of `data[index]` and commit the
    /// strict-majority value. Returns true iff the byte was repaired.
    async fn repair_by_vote(&self, index: usize) -> bool {
        let peers = {
            let mut directory = self.directory.lock().await;
            match directory.nodes().await {
                Ok(peers) => peers,
                Err(e) => {
                    tracing::warn!(index, error = %e, "roster unavailable, repair attempt failed");
                    return false;
                }
            }
        };
        if peers.is_empty() {
            tracing::warn!(index, "no peers in the roster, repair attempt failed");
            return false;
        }

        let mut votes: HashMap<u8, usize> = HashMap::new();
        let mut responders = 0usize;
        for peer in &peers {
            match query_byte(*peer, index).await {
                Ok(Some(value)) => {
                    responders += 1;
                    *votes.entry(value).or_default() += 1;
                }
                Ok(None) => {
                    tracing::debug!(index, peer = %peer, "peer could not serve the byte");
                }
                Err(e) => {
                    tracing::debug!(index, peer = %peer, error = %e, "peer did not respond");
                }
            }
        }

        match winner(&votes, responders) {
            Some(value) => {
                self.store.set(index, ParityByte::new(value));
                tracing::info!(index, value, responders, "byte repaired by peer majority");
                true
            }
            None => {
                tracing::warn!(
                    index,
                    responders,
                    candidates = votes.len(),
                    "no strict majority, byte stays suspect"
                );
                false
            }
        }
    }
}

/// Removes the ticket and wakes waiters (the watch sender drops with it).
struct TicketGuard<'a> {
    tickets: &'a Mutex<HashMap<usize, watch::Sender<()>>>,
    index: usize,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.tickets.lock().remove(&self.index);
    }
}

/// The value held by a strict majority (> half) of responders, if any.
/// Ties and pluralities do not commit.
fn winner(votes: &HashMap<u8, usize>, responders: usize) -> Option<u8> {
    let (&value, &count) = votes.iter().max_by_key(|&(_, &count)| count)?;
    (count * 2 > responders).then_some(value)
}

/// Ask one peer for the single byte at `index` over a short-lived
/// connection. `Ok(None)` is a null answer: the peer is alive but refused.
async fn query_byte(peer: SocketAddr, index: usize) -> Result<Option<u8>> {
    let mut stream = TcpStream::connect(peer)
        .await
        .context("failed to connect")?;
    let request = BlockRequest::new(index as i32, 1);
    frame::write_frame(&mut stream, request.as_bytes())
        .await
        .context("failed to send byte request")?;
    let payload = frame::read_frame(&mut stream)
        .await
        .context("failed to read byte response")?
        .context("peer closed before responding")?;
    match payload.len() {
        0 => Ok(None),
        1 => Ok(Some(payload[0])),
        n => bail!("expected a single byte, got {n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(values: &[u8]) -> HashMap<u8, usize> {
        let mut votes = HashMap::new();
        for &v in values {
            *votes.entry(v).or_insert(0) += 1;
        }
        votes
    }

    #[test]
    fn strict_majority_wins() {
        assert_eq!(winner(&tally(&[0x41, 0x41, 0x42]), 3), Some(0x41));
        assert_eq!(winner(&tally(&[0x41]), 1), Some(0x41));
        assert_eq!(winner(&tally(&[7, 7, 7, 9, 9]), 5), Some(7));
    }

    #[test]
    fn ties_and_pluralities_do_not_commit() {
        assert_eq!(winner(&tally(&[0x41, 0x42]), 2), None);
        assert_eq!(winner(&tally(&[0x41, 0x42, 0x43]), 3), None);
        // Plurality across four responders: 2 of 4 is not > half.
        assert_eq!(winner(&tally(&[1, 1, 2, 3]), 4), None);
    }

    #[test]
    fn no_responders_means_no_winner() {
        assert_eq!(winner(&HashMap::new(), 0), None);
    }
}
