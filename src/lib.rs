//! A high-throughput `recvmmsg`/`sendmmsg` UDP datagram server core for
//! Linux.
//!
//! The engine pairs an `epoll` readiness notifier with batched datagram
//! syscalls, an outbound queue with edge-triggered drain, and a multi-loop
//! fan-out layer built on `SO_REUSEPORT`. It covers the listener's datagram
//! I/O path only: address parsing beyond what a peer needs, the public
//! handler callback type, and any non-Linux fallback are treated as external
//! collaborators.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use udp_engine::{Handler, PeerAddr, Server, ServerConfig};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_readed(&self, payload: &[u8], peer: &PeerAddr) {
//!         // In a real handler, route this to the server that owns the
//!         // loop and call `write_to` back. Kept out of this example to
//!         // avoid a reference cycle between `Handler` and `Server`.
//!         let _ = (payload, peer);
//!     }
//! }
//!
//! let cfg = ServerConfig::new("udp", "127.0.0.1:0").reuse_port(true).listener_n(4);
//! let server = Server::new(cfg, Arc::new(Echo)).unwrap();
//! server.shutdown();
//! ```

extern crate libc;
#[macro_use]
extern crate log;

mod sys;

mod addr;
mod batch;
mod config;
mod epoll;
mod error;
mod eventloop;
mod handler;
mod handoff;
mod pool;
mod server;
mod sock;
mod waker;

pub use addr::PeerAddr;
pub use batch::OutMsg;
pub use config::ServerConfig;
pub use epoll::{Epoll, EpollOpt, Event, Events, Ready, Source, Token};
pub use error::{UdpError, UdpResult};
pub use handler::Handler;
pub use pool::OutboundMessage;
pub use server::Server;
pub use sock::Network;
pub use waker::Waker;
