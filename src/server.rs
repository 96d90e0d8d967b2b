//! Fans out N `EventLoop`s over N `SO_REUSEPORT` sockets (or just one),
//! exposes send/shutdown, and aggregates their lifetime.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::addr::PeerAddr;
use crate::batch::OutMsg;
use crate::config::ServerConfig;
use crate::error::{UdpError, UdpResult};
use crate::eventloop::{self, ClosedNotice, EventLoopHandle};
use crate::handler::Handler;
use crate::pool::MessagePool;
use crate::sock::{Network, UdpSocket};

/// The public entry point: owns one or more event loops and fans requests
/// out across them.
pub struct Server {
    loops: Mutex<IndexMap<RawFd, EventLoopHandle>>,
    next_loop: AtomicUsize,
    closed: AtomicBool,
    closed_rx: Mutex<mpsc::Receiver<ClosedNotice>>,
    closed_tx: mpsc::Sender<ClosedNotice>,
    pool: Arc<MessagePool>,
}

impl Server {
    /// Resolves `network`/`addr`, spawns `cfg.resolved_listener_n()` loops
    /// (each its own socket, poller and reader thread), and binds every one
    /// before returning. A startup failure on one socket is fatal to the
    /// whole call -- sockets already bound in this call are torn down, but
    /// a failure never reaches back into sibling `Server`s.
    pub fn new(cfg: ServerConfig, handler: Arc<dyn Handler>) -> UdpResult<Arc<Server>> {
        let network = Network::parse(&cfg.network)?;
        let listener_n = cfg.resolved_listener_n();
        info!("starting udp server on {} ({} listener(s), reuse_port={})", cfg.addr, listener_n, cfg.reuse_port);
        let (closed_tx, closed_rx) = mpsc::channel();
        let pool = MessagePool::new(cfg.mtu);

        let server = Arc::new(Server {
            loops: Mutex::new(IndexMap::new()),
            next_loop: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            closed_rx: Mutex::new(closed_rx),
            closed_tx,
            pool,
        });

        // A fan-out address with an ephemeral port (`:0`) would otherwise have
        // each `SO_REUSEPORT` socket assigned a *different* port by the
        // kernel, since nothing ties independent `bind()` calls together.
        // Bind the first loop against the caller's address, then pin every
        // sibling loop to the concrete port the kernel handed back.
        let mut bind_addr = cfg.addr.clone();
        let mut loops = IndexMap::new();
        for id in 0..listener_n {
            match server.spawn_loop(network, &cfg, &bind_addr, handler.clone(), id) {
                Ok((fd, handle)) => {
                    if id == 0 && listener_n > 1 {
                        bind_addr = handle.local_addr().to_string();
                    }
                    loops.insert(fd, handle);
                }
                Err(e) => {
                    for (_, mut handle) in loops {
                        handle.close(None);
                        handle.join();
                    }
                    return Err(e);
                }
            }
        }

        *server.loops.lock().unwrap() = loops;

        Ok(server)
    }

    fn spawn_loop(
        &self,
        network: Network,
        cfg: &ServerConfig,
        addr: &str,
        handler: Arc<dyn Handler>,
        id: usize,
    ) -> UdpResult<(RawFd, EventLoopHandle)> {
        let socket = UdpSocket::bind(network, addr, cfg.reuse_port)?;
        socket.set_buffer_sizes(cfg.recv_buf_size, cfg.send_buf_size)?;

        let fd = std::os::unix::io::AsRawFd::as_raw_fd(&socket);

        let handle = eventloop::spawn(
            id,
            socket,
            handler,
            self.pool.clone(),
            cfg.mtu,
            cfg.msg_hdr_size,
            cfg.read_event_size,
            cfg.write_event_size,
            self.closed_tx.clone(),
        )?;

        Ok((fd, handle))
    }

    /// Fast/slow path, routed to one loop chosen by round-robin (an atomic
    /// counter indexing into the loop map).
    pub fn write_to(&self, peer: &PeerAddr, payload: &[u8]) -> UdpResult<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(UdpError::ServerClosed);
        }

        let loops = self.loops.lock().unwrap();
        if loops.is_empty() {
            return Err(UdpError::ServerClosed);
        }

        let idx = self.next_loop.fetch_add(1, Ordering::Relaxed) % loops.len();
        let handle = loops.get_index(idx).map(|(_, h)| h).expect("idx < loops.len()");
        handle.write_to(payload, peer)
    }

    /// Batched send: all messages routed to one loop, chosen the same
    /// round-robin way as `write_to`.
    pub fn write_to_n(&self, messages: &[OutMsg]) -> UdpResult<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(UdpError::ServerClosed);
        }

        let loops = self.loops.lock().unwrap();
        if loops.is_empty() {
            return Err(UdpError::ServerClosed);
        }

        let idx = self.next_loop.fetch_add(1, Ordering::Relaxed) % loops.len();
        let handle = loops.get_index(idx).map(|(_, h)| h).expect("idx < loops.len()");
        handle.write_to_n(messages)
    }

    /// Snapshots the loop set, closes every not-yet-closed loop, waits for
    /// each to report back on the aggregation channel, then marks the
    /// server closed. Idempotent: a second call observes `closed` already
    /// set and returns immediately.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut loops = self.loops.lock().unwrap();
        let count = loops.len();
        info!("server shutting down {} loop(s)", count);

        for (_, handle) in loops.iter() {
            handle.close(None);
        }

        let rx = self.closed_rx.lock().unwrap();
        for _ in 0..count {
            let _ = rx.recv();
        }

        for (_, mut handle) in loops.drain(..) {
            handle.join();
        }

        debug!("server shutdown complete");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn loop_count(&self) -> usize {
        self.loops.lock().unwrap().len()
    }

    /// The address the first loop bound to. With `reuse_port` every loop
    /// binds the same address, so this is the address a client connects to
    /// regardless of which loop ends up handling a given datagram.
    pub fn local_addr(&self) -> UdpResult<std::net::SocketAddr> {
        let loops = self.loops.lock().unwrap();
        loops
            .get_index(0)
            .map(|(_, h)| h.local_addr())
            .ok_or(UdpError::ServerClosed)
    }
}
