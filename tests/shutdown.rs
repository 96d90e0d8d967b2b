//! Shutdown while buffered: enqueue a pile of unsent messages
//! via the slow path, then call `shutdown()`. It must return within a
//! bounded time, and every send issued afterwards must see `ServerClosed`.

use udp_engine::{Handler, PeerAddr, Server, ServerConfig, UdpError};

use std::net::UdpSocket as StdUdpSocket;
use std::time::{Duration, Instant};

struct NoOp;

impl Handler for NoOp {
    fn on_readed(&self, _payload: &[u8], _peer: &PeerAddr) {}
}

#[test]
fn shutdown_drains_promptly_with_buffered_sends() {
    let _ = env_logger::try_init();

    // A tiny send buffer makes it easy to push the fast path into EAGAIN
    // without needing a slow/non-reading peer on the other end.
    let cfg = ServerConfig::new("udp", "127.0.0.1:0").send_buf_size(2048);
    let server = Server::new(cfg, std::sync::Arc::new(NoOp)).expect("server starts");
    let server_addr = server.local_addr().expect("server bound");

    // A peer that never reads, so the kernel send buffer backs up and stays
    // backed up: every send beyond its capacity gets queued.
    let silent_peer = StdUdpSocket::bind("127.0.0.1:0").expect("peer binds");
    let silent_peer_addr = silent_peer.local_addr().unwrap();
    let peer = PeerAddr::from_socket_addr(silent_peer_addr);

    for i in 0..1000u32 {
        let _ = server.write_to(&peer, &i.to_be_bytes());
    }

    let start = Instant::now();
    server.shutdown();
    assert!(start.elapsed() < Duration::from_secs(5), "shutdown must return promptly");
    assert!(server.is_closed());

    match server.write_to(&peer, b"late") {
        Err(UdpError::ServerClosed) => {}
        other => panic!("expected ServerClosed after shutdown, got {:?}", other),
    }

    // A second shutdown is a no-op, not a hang or a panic.
    server.shutdown();
}
