//! Cluster integration tests.
//!
//! Each test stands up a miniature fleet over loopback TCP: an in-test
//! directory speaking the line protocol, plus real nodes started through
//! the normal lifecycle. Scan intervals are shortened so repair scenarios
//! settle within a test timeout.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use zerocopy::{AsBytes, FromBytes};

use cairn_core::config::NodeConfig;
use cairn_core::wire::{BlockRequest, BLOCK_LEN};
use cairn_core::DATA_SIZE;
use cairnd::frame;
use cairnd::node::Node;

// ── Harness ───────────────────────────────────────────────────────────────────

/// The payload every seeded node starts from.
fn pattern(index: usize) -> u8 {
    (index % 251) as u8
}

fn write_seed_file(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "cairn-cluster-{}-{}.bin",
        std::process::id(),
        name
    ));
    let bytes: Vec<u8> = (0..DATA_SIZE).map(pattern).collect();
    std::fs::write(&path, bytes).expect("failed to write seed file");
    path
}

/// In-test directory service: accepts `INSC` registrations and answers
/// `nodes` with the current roster.
struct FakeDirectory {
    addr: SocketAddr,
    roster: Arc<Mutex<Vec<(String, u16)>>>,
}

impl FakeDirectory {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let roster: Arc<Mutex<Vec<(String, u16)>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_roster = roster.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let roster = accept_roster.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let line = line.trim();
                        if let Some(rest) = line.strip_prefix("INSC ") {
                            let mut parts = rest.split_whitespace();
                            if let (Some(host), Some(port)) = (parts.next(), parts.next()) {
                                if let Ok(port) = port.parse() {
                                    roster.lock().await.push((host.to_string(), port));
                                }
                            }
                        } else if line.eq_ignore_ascii_case("nodes") {
                            let mut response = String::new();
                            for (host, port) in roster.lock().await.iter() {
                                response.push_str(&format!("node {host} {port}\n"));
                            }
                            response.push_str("end\n");
                            if write_half.write_all(response.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        Self { addr, roster }
    }

    /// Register an endpoint by hand — used for scripted peers that do not
    /// go through the normal node lifecycle.
    async fn add(&self, port: u16) {
        self.roster.lock().await.push(("127.0.0.1".into(), port));
    }
}

fn node_config(directory: &FakeDirectory, seed: Option<&Path>) -> NodeConfig {
    NodeConfig {
        directory_host: "127.0.0.1".into(),
        directory_port: directory.addr.port(),
        node_port: 0,
        data_file: seed.map(Path::to_path_buf),
        scanners: 2,
        scan_interval: Duration::from_millis(100),
    }
}

/// Start a node and put its accept loop in the background.
async fn start_serving(directory: &FakeDirectory, seed: Option<&Path>) -> RunningNode {
    let node = Node::start(node_config(directory, seed))
        .await
        .expect("node failed to start");
    let store = node.store();
    let corrector = node.corrector();
    let port = node.port();
    tokio::spawn(node.serve());
    RunningNode {
        port,
        store,
        corrector,
    }
}

/// A running node's observable surface.
struct RunningNode {
    port: u16,
    store: Arc<cairn_core::ByteStore>,
    corrector: Arc<cairnd::corrector::Corrector>,
}

fn assert_store_matches_pattern(store: &cairn_core::ByteStore) {
    for index in 0..DATA_SIZE {
        let byte = store.get(index);
        assert!(byte.is_parity_ok(), "parity bad at {index}");
        assert_eq!(byte.value(), pattern(index), "wrong value at {index}");
    }
}

/// A scripted peer that serves pattern data, closing each connection after
/// `per_connection_limit` responses when a limit is given.
async fn spawn_scripted_peer(per_connection_limit: Option<usize>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut served = 0usize;
                while let Ok(Some(payload)) = frame::read_frame(&mut stream).await {
                    if per_connection_limit.is_some_and(|limit| served >= limit) {
                        return; // drop the connection mid-conversation
                    }
                    let response: Vec<u8> = BlockRequest::read_from(&payload[..])
                        .and_then(|request| request.range())
                        .map(|range| range.map(pattern).collect())
                        .unwrap_or_default();
                    if frame::write_frame(&mut stream, &response).await.is_err() {
                        return;
                    }
                    served += 1;
                }
            });
        }
    });
    port
}

/// A scripted peer that answers every request with one fixed byte.
async fn spawn_voter(value: u8) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                while let Ok(Some(_)) = frame::read_frame(&mut stream).await {
                    if frame::write_frame(&mut stream, &[value]).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    port
}

async fn wait_until_parity_ok(store: &cairn_core::ByteStore, index: usize, budget: Duration) {
    let deadline = tokio::time::Instant::now() + budget;
    while !store.get(index).is_parity_ok() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "byte {index} was not repaired in time"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn solo_seed_bootstrap() {
    let directory = FakeDirectory::spawn().await;
    let seed = write_seed_file("solo-seed");

    let _a = start_serving(&directory, Some(&seed)).await;
    let b = start_serving(&directory, None).await;

    assert_store_matches_pattern(&b.store);
    let _ = std::fs::remove_file(&seed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_peer_bootstrap() {
    let directory = FakeDirectory::spawn().await;
    let seed = write_seed_file("two-peer");

    let _a = start_serving(&directory, Some(&seed)).await;
    let _b = start_serving(&directory, Some(&seed)).await;
    let c = start_serving(&directory, None).await;

    assert_store_matches_pattern(&c.store);
    let _ = std::fs::remove_file(&seed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn injected_error_is_repaired_by_peer_majority() {
    let directory = FakeDirectory::spawn().await;
    let seed = write_seed_file("repair");

    let _a = start_serving(&directory, Some(&seed)).await;
    let _b = start_serving(&directory, Some(&seed)).await;
    let c = start_serving(&directory, Some(&seed)).await;

    let (_, corrupted) = c.store.corrupt(42);
    assert!(!corrupted.is_parity_ok());

    // The scanners should find and repair the byte within a few passes.
    wait_until_parity_ok(&c.store, 42, Duration::from_secs(10)).await;
    assert_eq!(c.store.get(42).value(), pattern(42));

    let _ = std::fs::remove_file(&seed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peer_death_mid_bootstrap_is_absorbed_by_the_survivor() {
    let directory = FakeDirectory::spawn().await;
    let seed = write_seed_file("flaky");

    // A healthy node plus a scripted peer that dies after 30 blocks.
    let _healthy = start_serving(&directory, Some(&seed)).await;
    let flaky_port = spawn_scripted_peer(Some(30)).await;
    directory.add(flaky_port).await;

    let c = start_serving(&directory, None).await;
    assert_store_matches_pattern(&c.store);

    let _ = std::fs::remove_file(&seed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_requests_get_null_frames_and_the_connection_survives() {
    let directory = FakeDirectory::spawn().await;
    let seed = write_seed_file("malformed");
    let a = start_serving(&directory, Some(&seed)).await;

    let mut stream = TcpStream::connect(("127.0.0.1", a.port)).await.unwrap();

    // Out-of-range request: null frame, connection stays open.
    let out_of_range = BlockRequest::new(2_000_000, 10);
    frame::write_frame(&mut stream, out_of_range.as_bytes())
        .await
        .unwrap();
    let response = frame::read_frame(&mut stream).await.unwrap().unwrap();
    assert!(response.is_empty(), "expected the null sentinel");

    // Unparseable payload: also a null frame.
    frame::write_frame(&mut stream, &[1, 2, 3]).await.unwrap();
    let response = frame::read_frame(&mut stream).await.unwrap().unwrap();
    assert!(response.is_empty(), "expected the null sentinel");

    // The same connection still serves valid requests, at both ends of
    // the store.
    for start in [0i32, (DATA_SIZE - 1) as i32] {
        let request = BlockRequest::new(start, 1);
        frame::write_frame(&mut stream, request.as_bytes())
            .await
            .unwrap();
        let response = frame::read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(response.len(), 1);
        assert_eq!(response[0], pattern(start as usize));
    }

    let _ = std::fs::remove_file(&seed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn block_round_trip_returns_the_requested_range() {
    let directory = FakeDirectory::spawn().await;
    let seed = write_seed_file("round-trip");
    let a = start_serving(&directory, Some(&seed)).await;

    let mut stream = TcpStream::connect(("127.0.0.1", a.port)).await.unwrap();
    let start = 3 * BLOCK_LEN;
    let request = BlockRequest::new(start as i32, BLOCK_LEN as i32);
    frame::write_frame(&mut stream, request.as_bytes())
        .await
        .unwrap();
    let response = frame::read_frame(&mut stream).await.unwrap().unwrap();
    assert_eq!(response.len(), BLOCK_LEN);
    for (offset, &byte) in response.iter().enumerate() {
        assert_eq!(byte, pattern(start + offset));
    }

    let _ = std::fs::remove_file(&seed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn majority_vote_commits_the_winner() {
    let directory = FakeDirectory::spawn().await;
    let seed = write_seed_file("majority");

    for value in [0x41, 0x41, 0x42] {
        let port = spawn_voter(value).await;
        directory.add(port).await;
    }

    let d = start_serving(&directory, Some(&seed)).await;
    d.store.corrupt(7);

    assert!(d.corrector.correct(7).await);
    assert_eq!(d.store.get(7).value(), 0x41);
    assert!(d.store.get(7).is_parity_ok());

    let _ = std::fs::remove_file(&seed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn majority_disagreement_leaves_the_byte_suspect() {
    let directory = FakeDirectory::spawn().await;
    let seed = write_seed_file("disagreement");

    for value in [0x41, 0x42, 0x43] {
        let port = spawn_voter(value).await;
        directory.add(port).await;
    }

    let d = start_serving(&directory, Some(&seed)).await;
    d.store.corrupt(7);

    assert!(!d.corrector.try_correct(7).await);
    // The scanners keep retrying, but three-way disagreement never commits.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!d.store.get(7).is_parity_ok());

    let _ = std::fs::remove_file(&seed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_roster_fails_bootstrap() {
    let directory = FakeDirectory::spawn().await;
    // The roster will contain only this node itself, which is filtered
    // out, leaving nothing to bootstrap from.
    let result = Node::start(node_config(&directory, None)).await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_roster_at_steady_state_only_fails_the_repair() {
    let directory = FakeDirectory::spawn().await;
    let seed = write_seed_file("lonely");

    let a = start_serving(&directory, Some(&seed)).await;
    a.store.corrupt(99);

    assert!(!a.corrector.try_correct(99).await);
    assert!(!a.store.get(99).is_parity_ok());
    // A healthy byte is still a healthy byte.
    assert!(a.corrector.try_correct(100).await);

    let _ = std::fs::remove_file(&seed);
}
