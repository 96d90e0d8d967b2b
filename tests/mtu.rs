//! Over-MTU: this crate pins truncation, not rejection,
//! consistently across the single-write and batched paths.

use std::net::UdpSocket as StdUdpSocket;
use std::sync::Arc;
use std::time::Duration;

use udp_engine::{Handler, OutMsg, PeerAddr, Server, ServerConfig};

const MTU: usize = 64;

struct NoOp;

impl Handler for NoOp {
    fn on_readed(&self, _payload: &[u8], _peer: &PeerAddr) {}
}

#[test]
fn over_mtu_payload_is_truncated_on_the_wire() {
    let _ = env_logger::try_init();

    let cfg = ServerConfig::new("udp", "127.0.0.1:0").mtu(MTU);
    let server = Server::new(cfg, Arc::new(NoOp)).expect("server starts");
    let server_addr = server.local_addr().expect("server bound");

    let client = StdUdpSocket::bind("127.0.0.1:0").expect("client binds");
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let peer = PeerAddr::from_socket_addr(client.local_addr().unwrap());

    let oversized = vec![7u8; MTU * 2];

    server.write_to(&peer, &oversized).expect("fast-path send");
    let mut buf = vec![0u8; MTU * 4];
    let (n, _) = client.recv_from(&mut buf).expect("recv truncated datagram");
    assert_eq!(n, MTU, "write_to must truncate to the configured MTU");

    let messages = vec![OutMsg { peer: peer.clone(), payload: oversized.clone() }];
    server.write_to_n(&messages).expect("batched send");
    let (n, _) = client.recv_from(&mut buf).expect("recv truncated batched datagram");
    assert_eq!(n, MTU, "write_to_n must truncate to the configured MTU");

    server.shutdown();
}
