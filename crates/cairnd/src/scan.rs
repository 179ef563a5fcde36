//! Correction scanners — background sweeps for parity-bad bytes.
//!
//! Each scanner walks the whole store in index order. A bad byte is
//! retried until either this scanner's `try_correct` succeeds or another
//! scanner's ticket shows up for the same index — the ticket map
//! guarantees only one set of peer queries per repair no matter how many
//! scanners trip over the same byte. A sleep between passes bounds CPU.

use std::sync::Arc;
use std::time::Duration;

use cairn_core::ByteStore;

use crate::corrector::Corrector;

pub async fn scan_loop(
    id: usize,
    store: Arc<ByteStore>,
    corrector: Arc<Corrector>,
    interval: Duration,
) {
    tracing::debug!(scanner = id, "correction scanner started");
    loop {
        for index in 0..store.len() {
            if store.get(index).is_parity_ok() {
                continue;
            }
            tracing::info!(scanner = id, index, "parity failure detected");
            while !corrector.try_correct(index).await && !corrector.is_correcting(index) {
                // Repair failed and nobody else is on it. Retry shortly.
                tokio::time::sleep(interval).await;
            }
        }
        tokio::time::sleep(interval).await;
    }
}
