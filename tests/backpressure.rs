//! Backpressure + EPOLLOUT: force the outbound queue to fill
//! by shrinking the kernel send buffer and having the client stall before it
//! reads, then verify every reply still arrives once the client catches up.

use std::net::UdpSocket as StdUdpSocket;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use udp_engine::{Handler, PeerAddr, Server, ServerConfig};

const REPLIES: u32 = 2000;

struct Blaster {
    server: OnceLock<Weak<Server>>,
}

impl Handler for Blaster {
    fn on_readed(&self, _payload: &[u8], peer: &PeerAddr) {
        if let Some(server) = self.server.get().and_then(Weak::upgrade) {
            for seq in 0..REPLIES {
                // write_to never blocks: EAGAIN falls to the slow path and
                // the datagram is queued instead of dropped.
                let _ = server.write_to(peer, &seq.to_be_bytes());
            }
        }
    }
}

#[test]
fn no_datagram_is_dropped_under_backpressure() {
    let _ = env_logger::try_init();
    let handler = Arc::new(Blaster { server: OnceLock::new() });
    let cfg = ServerConfig::new("udp", "127.0.0.1:0")
        .send_buf_size(4096)
        .write_event_size(16);
    let server = Server::new(cfg, handler.clone()).expect("server starts");
    handler.server.set(Arc::downgrade(&server)).ok();

    let server_addr = server.local_addr().expect("server bound");
    let client = StdUdpSocket::bind("127.0.0.1:0").expect("client binds");
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    client.send_to(b"start", server_addr).expect("send start");

    // Stall before reading so the server's sends back up in the kernel send
    // buffer and spill into the outbound queue.
    std::thread::sleep(Duration::from_millis(150));

    let mut received: Vec<bool> = vec![false; REPLIES as usize];
    let mut count = 0usize;
    let mut buf = [0u8; 16];
    while count < REPLIES as usize {
        let (n, _) = client.recv_from(&mut buf).expect("recv reply");
        assert_eq!(n, 4);
        let seq = u32::from_be_bytes(buf[..4].try_into().unwrap());
        assert!(!received[seq as usize], "duplicate sequence {}", seq);
        received[seq as usize] = true;
        count += 1;
    }

    assert!(received.iter().all(|&b| b), "every queued reply must eventually arrive");

    server.shutdown();
}
