//! Injection console — operator-driven corruption, a test aid.
//!
//! Reads stdin line by line. `ERROR <index>` flips one data bit at that
//! index, leaving the parity bit stale so the scanners have something to
//! find. Anything else gets a diagnostic and is ignored. EOF ends the
//! task quietly.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use cairn_core::{ByteStore, DATA_SIZE};

pub async fn injection_loop(store: Arc<ByteStore>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(command), Some(position), None) if command.eq_ignore_ascii_case("error") => {
                match position.parse::<usize>() {
                    Ok(index) if index < DATA_SIZE => {
                        let (before, after) = store.corrupt(index);
                        tracing::info!(
                            index,
                            before = before.value(),
                            after = after.value(),
                            parity_ok = after.is_parity_ok(),
                            "error injected"
                        );
                    }
                    _ => {
                        tracing::warn!(
                            input = position,
                            "position must be an integer between 0 and {}",
                            DATA_SIZE - 1
                        );
                    }
                }
            }
            _ => tracing::warn!(input = line, "invalid input, expected: ERROR <byte-index>"),
        }
    }
    tracing::debug!("injection console closed");
}
