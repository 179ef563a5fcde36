//! Directory client — line protocol to the external node registry.
//!
//! One TCP connection for the node's lifetime. On connect the node
//! announces itself with `INSC <host> <port>`; afterwards `nodes` returns
//! the roster, one `node <host> <port>` line per peer, terminated by `end`
//! (case-insensitive). The directory socket is single-threaded by
//! contract: the bootstrap driver and the corrector are the only callers
//! and serialize behind one lock, so at most one `nodes` request is ever
//! outstanding.

use std::net::{IpAddr, SocketAddr};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct DirectoryClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Local address of the directory socket — the host we registered as.
    local_addr: IpAddr,
    /// Our listening port, used to filter ourselves out of the roster.
    node_port: u16,
}

impl DirectoryClient {
    /// Connect to the directory and register `(local-host, node_port)`.
    pub async fn register(host: &str, port: u16, node_port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("failed to connect to directory {host}:{port}"))?;
        let local_addr = stream.local_addr()?.ip();
        let (read_half, mut writer) = stream.into_split();

        writer
            .write_all(format!("INSC {local_addr} {node_port}\n").as_bytes())
            .await
            .context("failed to send registration")?;
        tracing::info!(host = %local_addr, port = node_port, "registered with directory");

        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            local_addr,
            node_port,
        })
    }

    /// Fetch the current roster, excluding this node's own endpoint.
    ///
    /// Malformed lines are skipped, matching the tolerant roster parse the
    /// directory's other clients rely on. A connection that closes before
    /// the `end` terminator is a failure: the caller cannot tell a partial
    /// roster from a complete one.
    pub async fn nodes(&mut self) -> Result<Vec<SocketAddr>> {
        self.writer
            .write_all(b"nodes\n")
            .await
            .context("failed to send nodes request")?;

        let mut entries = Vec::new();
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .context("failed to read directory response")?;
            if n == 0 {
                bail!("directory closed the connection mid-response");
            }
            let line = line.trim();
            if line.eq_ignore_ascii_case("end") {
                break;
            }
            entries.push(line.to_string());
        }

        let mut peers = Vec::new();
        for entry in &entries {
            let Some((host, port)) = parse_node_line(entry) else {
                tracing::debug!(line = %entry, "skipping malformed roster line");
                continue;
            };
            let addr = match tokio::net::lookup_host((host, port)).await {
                Ok(mut resolved) => match resolved.next() {
                    Some(addr) => addr,
                    None => continue,
                },
                Err(_) => {
                    tracing::debug!(line = %entry, "skipping unresolvable roster entry");
                    continue;
                }
            };
            if addr.ip() == self.local_addr && addr.port() == self.node_port {
                continue;
            }
            peers.push(addr);
        }
        Ok(peers)
    }

    /// Close the directory connection. Part of the shutdown path.
    pub async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

impl std::fmt::Display for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DirectoryClient{{local={}:{}}}",
            self.local_addr, self.node_port
        )
    }
}

/// Parse one `node <host> <port>` roster line.
fn parse_node_line(line: &str) -> Option<(&str, u16)> {
    let mut parts = line.split_whitespace();
    let tag = parts.next()?;
    let host = parts.next()?;
    let port = parts.next()?;
    if parts.next().is_some() || !tag.eq_ignore_ascii_case("node") {
        return None;
    }
    Some((host, port.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        assert_eq!(
            parse_node_line("node 10.0.0.7 9100"),
            Some(("10.0.0.7", 9100))
        );
        // Tag match is case-insensitive, like the `end` terminator.
        assert_eq!(
            parse_node_line("NODE 10.0.0.7 9100"),
            Some(("10.0.0.7", 9100))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_node_line(""), None);
        assert_eq!(parse_node_line("node 10.0.0.7"), None);
        assert_eq!(parse_node_line("node 10.0.0.7 9100 extra"), None);
        assert_eq!(parse_node_line("peer 10.0.0.7 9100"), None);
        assert_eq!(parse_node_line("node 10.0.0.7 notaport"), None);
        assert_eq!(parse_node_line("node 10.0.0.7 99999"), None);
    }
}
