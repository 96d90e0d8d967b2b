//! Reuseport fan-out: several loops share one bound address;
//! every datagram is delivered to `on_readed` exactly once across all loops.

use std::collections::HashSet;
use std::net::UdpSocket as StdUdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use udp_engine::{Handler, PeerAddr, Server, ServerConfig};

const CLIENTS: usize = 500;

struct Collector {
    seen: Mutex<HashSet<u32>>,
}

impl Handler for Collector {
    fn on_readed(&self, payload: &[u8], _peer: &PeerAddr) {
        if payload.len() == 4 {
            let id = u32::from_be_bytes(payload.try_into().unwrap());
            self.seen.lock().unwrap().insert(id);
        }
    }
}

#[test]
fn every_datagram_delivered_exactly_once() {
    let _ = env_logger::try_init();
    let handler = Arc::new(Collector { seen: Mutex::new(HashSet::new()) });
    let cfg = ServerConfig::new("udp", "127.0.0.1:0").reuse_port(true).listener_n(4);
    let server = Server::new(cfg, handler.clone()).expect("server starts");
    assert_eq!(server.loop_count(), 4);

    let server_addr = server.local_addr().expect("server bound");

    for id in 0..CLIENTS as u32 {
        let client = StdUdpSocket::bind("127.0.0.1:0").expect("client binds");
        client.send_to(&id.to_be_bytes(), server_addr).expect("send");
    }

    // Give every loop's reader task time to drain recvmmsg to EAGAIN.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if handler.seen.lock().unwrap().len() == CLIENTS || std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let seen = handler.seen.lock().unwrap();
    assert_eq!(seen.len(), CLIENTS, "every client id must be observed exactly once");

    drop(seen);
    server.shutdown();
}
