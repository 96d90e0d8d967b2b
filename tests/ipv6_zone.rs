//! IPv6: a `udp6` server on the loopback address decodes and
//! re-encodes peers correctly. `::1` is not a link-local address, so a
//! sender that doesn't attach a zone is decoded with an empty zone -- the
//! deterministic half of the scenario; the interface-name/scope-id
//! resolution itself is covered directly against `addr::zone_id_to_string`
//! in that module's own unit tests, since a live link-local interface isn't
//! guaranteed to exist in a test sandbox.

use std::net::UdpSocket as StdUdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use udp_engine::{Handler, PeerAddr, Server, ServerConfig};

struct Capture {
    peer: Mutex<Option<PeerAddr>>,
}

impl Handler for Capture {
    fn on_readed(&self, _payload: &[u8], peer: &PeerAddr) {
        *self.peer.lock().unwrap() = Some(peer.clone());
    }
}

#[test]
fn loopback_v6_peer_has_empty_zone() {
    let _ = env_logger::try_init();
    let handler = Arc::new(Capture { peer: Mutex::new(None) });
    let cfg = ServerConfig::new("udp6", "[::1]:0");
    let server = Server::new(cfg, handler.clone()).expect("server starts");
    let server_addr = server.local_addr().expect("server bound");
    assert!(server_addr.is_ipv6());

    let client = StdUdpSocket::bind("[::1]:0").expect("client binds");
    client.send_to(b"hi", server_addr).expect("send");

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if handler.peer.lock().unwrap().is_some() || std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let peer = handler.peer.lock().unwrap().clone().expect("peer observed");
    assert!(peer.ip().is_ipv6());
    assert_eq!(peer.zone(), "", "::1 carries no link-local scope id");

    server.shutdown();
}
