//! Echo, single loop: a server on 127.0.0.1:0 echoes every
//! datagram back to its sender; the client sees every byte it sent.

use std::net::UdpSocket as StdUdpSocket;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use udp_engine::{Handler, PeerAddr, Server, ServerConfig};

struct Echo {
    server: OnceLock<Weak<Server>>,
}

impl Handler for Echo {
    fn on_readed(&self, payload: &[u8], peer: &PeerAddr) {
        if let Some(server) = self.server.get().and_then(Weak::upgrade) {
            let _ = server.write_to(peer, payload);
        }
    }
}

#[test]
fn echo_five_pings() {
    let _ = env_logger::try_init();
    let handler = Arc::new(Echo { server: OnceLock::new() });
    let cfg = ServerConfig::new("udp", "127.0.0.1:0");
    let server = Server::new(cfg, handler.clone()).expect("server starts");
    handler.server.set(Arc::downgrade(&server)).ok();

    let client = StdUdpSocket::bind("127.0.0.1:0").expect("client binds");
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let server_addr = server.local_addr().expect("server bound");

    let mut buf = [0u8; 16];
    for _ in 0..5 {
        client.send_to(b"ping", server_addr).expect("send");
        let (n, from) = client.recv_from(&mut buf).expect("recv echo");
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, server_addr);
    }

    server.shutdown();
    assert!(server.is_closed());
}
