//! Per-socket state machine: translates readiness into batched read/write
//! calls, manages the outbound queue, dispatches received datagrams.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, Once};
use std::thread::JoinHandle;

use crate::addr::PeerAddr;
use crate::batch::{self, validate_outbound, BatchIO, OutMsg, WriteOutcome};
use crate::epoll::{Epoll, EpollOpt, Events, Ready, Token};
use crate::error::{is_transient, UdpError, UdpResult};
use crate::handler::Handler;
use crate::handoff::Handoff;
use crate::pool::{MessagePool, OutboundMessage};
use crate::sock::UdpSocket;
use crate::waker::Waker;

const SOCKET_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

/// Sent to the `Server`'s aggregation channel exactly once per loop, when it
/// terminates.
pub struct ClosedNotice {
    pub id: usize,
    pub err: Option<UdpError>,
}

struct QueueState {
    queue: VecDeque<OutboundMessage>,
    interest: Ready,
}

struct Shared {
    id: usize,
    fd: RawFd,
    mtu: usize,
    write_event_size: usize,
    epoll: Epoll,
    waker: Waker,
    handler: Arc<dyn Handler>,
    pool: Arc<MessagePool>,
    state: Mutex<QueueState>,
    closed: AtomicBool,
    close_once: Once,
    closed_tx: Sender<ClosedNotice>,
    read_chan: Handoff<()>,
    local_addr: std::net::SocketAddr,
    // Kept alive so the fd stays valid for the lifetime of the loop; never
    // touched again after being handed to the poller/reader threads.
    _socket: UdpSocket,
}

/// A handle the `Server` keeps per loop: enough to send on it and to close
/// it, without owning the OS threads directly.
pub struct EventLoopHandle {
    shared: Arc<Shared>,
    poller_thread: Option<JoinHandle<()>>,
    reader_thread: Option<JoinHandle<()>>,
}

impl EventLoopHandle {
    pub fn fd(&self) -> RawFd {
        self.shared.fd
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.shared.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Fast path then slow path.
    pub fn write_to(&self, payload: &[u8], peer: &PeerAddr) -> UdpResult<usize> {
        validate_outbound(payload)?;

        if self.shared.closed.load(Ordering::Acquire) {
            return Err(UdpError::ServerClosed);
        }

        match batch::send_one(self.shared.fd, self.shared.mtu, payload, peer) {
            Ok(n) => Ok(n),
            Err(e) if is_transient(&e) => {
                self.enqueue(peer.clone(), payload);
                Ok(payload.len())
            }
            Err(e) => {
                let msg = e.to_string();
                self.close(Some(UdpError::Fatal(e)));
                Err(UdpError::Fatal(io::Error::new(io::ErrorKind::Other, msg)))
            }
        }
    }

    /// Delegates a whole batch to this loop's `BatchIO::write_to_n`:
    /// one `sendmmsg` call from the caller's own thread, not routed
    /// through the outbound queue. A message with no address or an empty
    /// payload is rejected before the syscall runs at all.
    pub fn write_to_n(&self, messages: &[OutMsg]) -> UdpResult<usize> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(UdpError::ServerClosed);
        }

        for msg in messages {
            validate_outbound(&msg.payload)?;
        }

        match batch::write_to_n(self.shared.fd, self.shared.mtu, messages) {
            WriteOutcome::Succeed(n) => Ok(n),
            WriteOutcome::Retry => Ok(0),
            WriteOutcome::Failed(e) => {
                let msg = e.to_string();
                self.close(Some(UdpError::Fatal(e)));
                Err(UdpError::Fatal(io::Error::new(io::ErrorKind::Other, msg)))
            }
        }
    }

    fn enqueue(&self, peer: PeerAddr, payload: &[u8]) {
        let msg = self.shared.pool.acquire(peer, payload);
        let mut state = self.shared.state.lock().unwrap();
        state.queue.push_back(msg);
        if !state.interest.is_writable() {
            state.interest = state.interest | Ready::writable();
            let _ = self.shared.epoll.modify(&self.shared.fd, SOCKET_TOKEN, state.interest, EpollOpt::edge());
        }
    }

    /// Idempotent shutdown: deregisters the fd, closes
    /// the read channel so the reader task drains and exits, wakes the
    /// poller out of `epoll_wait`, and reports to the `Server`.
    pub fn close(&self, err: Option<UdpError>) {
        self.shared.shutdown(err);
    }

    /// Blocks until both the poller and reader threads have exited. Called
    /// by `Server::shutdown` after `close` has been issued on every loop.
    pub fn join(&mut self) {
        if let Some(h) = self.poller_thread.take() {
            let _ = h.join();
        }
        if let Some(h) = self.reader_thread.take() {
            let _ = h.join();
        }
    }
}

/// Spawns the poller and reader threads for one loop and returns a handle
/// the `Server` retains. Each of the two tasks pins its worker to its own
/// dedicated `std::thread`.
pub fn spawn(
    id: usize,
    socket: UdpSocket,
    handler: Arc<dyn Handler>,
    pool: Arc<MessagePool>,
    mtu: usize,
    msg_hdr_size: usize,
    read_event_size: usize,
    write_event_size: usize,
    closed_tx: Sender<ClosedNotice>,
) -> io::Result<EventLoopHandle> {
    let fd = socket.as_raw_fd();
    let epoll = Epoll::new()?;
    let waker = Waker::new()?;

    epoll.add(&fd, SOCKET_TOKEN, Ready::readable(), EpollOpt::edge())?;
    epoll.add(&waker, WAKER_TOKEN, Ready::readable(), EpollOpt::edge())?;

    let local_addr = socket.local_addr();
    info!("loop {} bound on {:?}", id, local_addr);

    let read_chan: Handoff<()> = Handoff::with_capacity(read_event_size);

    let shared = Arc::new(Shared {
        id,
        fd,
        mtu,
        write_event_size,
        epoll,
        waker,
        handler,
        pool,
        state: Mutex::new(QueueState { queue: VecDeque::new(), interest: Ready::readable() }),
        closed: AtomicBool::new(false),
        close_once: Once::new(),
        closed_tx,
        read_chan,
        local_addr,
        _socket: socket,
    });

    let reader_shared = shared.clone();
    let reader_thread = std::thread::Builder::new()
        .name(format!("udp-engine-reader-{}", id))
        .spawn(move || reader_loop(reader_shared, msg_hdr_size))?;

    let poller_shared = shared.clone();
    let poller_thread = std::thread::Builder::new()
        .name(format!("udp-engine-poller-{}", id))
        .spawn(move || poller_loop(poller_shared))?;

    Ok(EventLoopHandle {
        shared,
        poller_thread: Some(poller_thread),
        reader_thread: Some(reader_thread),
    })
}

/// Blocks on the multiplexer and never runs user code directly: readable
/// events are handed off to the reader task, writable events are drained
/// inline (draining touches no user callback, so it stays on this thread).
fn poller_loop(shared: Arc<Shared>) {
    let mut events = Events::with_capacity(128);
    let mut write_buf: Vec<OutMsg> = Vec::with_capacity(shared.write_event_size);

    loop {
        match shared.epoll.wait(&mut events, None) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                shared.report_fatal(e);
                break;
            }
        }

        if events.len() == 0 {
            continue;
        }

        if shared.closed.load(Ordering::Acquire) {
            break;
        }

        let mut saw_read = false;
        let mut saw_write = false;
        let mut saw_waker = false;

        for i in 0..events.len() {
            if let Some(event) = events.get(i) {
                match event.token() {
                    SOCKET_TOKEN => {
                        if event.readiness().is_readable() {
                            saw_read = true;
                        }
                        if event.readiness().is_writable() {
                            saw_write = true;
                        }
                        if event.readiness().is_error() || event.readiness().is_hup() {
                            saw_read = true;
                        }
                    }
                    WAKER_TOKEN => saw_waker = true,
                    _ => {}
                }
            }
        }

        // Tie-break: process R before W within the same wakeup.
        if saw_read && !shared.closed.load(Ordering::Acquire) {
            if shared.read_chan.send(()).is_err() {
                break;
            }
        }

        if saw_write {
            drain_write(&shared, &mut write_buf);
        }

        if saw_waker {
            let _ = shared.waker.finish();
            if shared.closed.load(Ordering::Acquire) {
                break;
            }
        }
    }
}

/// Consumes wake tokens and runs `BatchIO::read_batch` to `EAGAIN` for each
/// one, so edge-triggered readiness is never left un-drained.
fn reader_loop(shared: Arc<Shared>, msg_hdr_size: usize) {
    let mut batch_io = BatchIO::new(shared.fd, msg_hdr_size, shared.mtu);

    loop {
        match shared.read_chan.recv() {
            Ok(()) => loop {
                match batch_io.read_batch(|payload, peer| {
                    shared.handler.on_readed(payload, peer);
                }) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        shared.report_fatal(e);
                        return;
                    }
                }
            },
            Err(_closed) => break,
        }
    }
}

/// Partitions the outbound queue into chunks of at most `write_event_size`
/// and flushes them: the tail first, then full chunks back-to-front, so
/// every removal comes off the back of the queue and the front never needs
/// compaction.
fn drain_write(shared: &Arc<Shared>, scratch: &mut Vec<OutMsg>) {
    let mut state = shared.state.lock().unwrap();
    let n = state.queue.len();
    if n == 0 {
        return;
    }

    let w = shared.write_event_size.max(1);
    let surplus = n % w;
    let mut remaining = n;

    if surplus > 0 {
        if !flush_chunk(shared, &mut state, surplus, scratch) {
            return;
        }
        remaining -= surplus;
    }

    while remaining > 0 {
        if !flush_chunk(shared, &mut state, w, scratch) {
            return;
        }
        remaining -= w;
    }

    if state.queue.is_empty() && state.interest.is_writable() {
        state.interest = Ready::readable();
        let _ = shared.epoll.modify(&shared.fd, SOCKET_TOKEN, state.interest, EpollOpt::edge());
    }
}

/// Sends the last `len` messages currently in the queue. `sendmmsg` accepts
/// a chunk front-to-back and can take fewer than `len` if the kernel send
/// queue fills mid-chunk, so only the `accepted` messages at the front of
/// the chunk -- the ones the kernel actually took -- are removed; the
/// unsent remainder stays queued at the back, to go out on the next
/// wakeup instead of being dropped. Returns `false` if the caller should
/// stop processing further chunks this wakeup (a short or zero accept
/// count, a `retry` outcome, or a fatal error that closed the loop).
fn flush_chunk(shared: &Arc<Shared>, state: &mut QueueState, len: usize, scratch: &mut Vec<OutMsg>) -> bool {
    scratch.clear();
    let start = state.queue.len() - len;
    for msg in state.queue.iter().skip(start) {
        scratch.push(OutMsg { peer: msg.peer.clone(), payload: msg.payload.clone() });
    }

    match batch::write_to_n(shared.fd, shared.mtu, scratch) {
        WriteOutcome::Retry => false,
        WriteOutcome::Failed(e) => {
            shared.report_fatal(e);
            false
        }
        WriteOutcome::Succeed(accepted) => {
            for msg in state.queue.drain(start..start + accepted) {
                shared.pool.release(msg);
            }
            accepted == len
        }
    }
}

impl Shared {
    fn report_fatal(&self, e: io::Error) {
        error!("loop {} hit a fatal I/O error: {}", self.id, e);
        self.shutdown(Some(UdpError::Fatal(e)));
    }

    /// The single idempotent shutdown sequence, reachable from a producer
    /// thread calling `EventLoopHandle::close` or from the poller/reader
    /// threads hitting a fatal error.
    fn shutdown(&self, err: Option<UdpError>) {
        self.close_once.call_once(|| {
            debug!("closing loop {} (err: {:?})", self.id, err.as_ref().map(ToString::to_string));
            self.closed.store(true, Ordering::Release);
            let _ = self.epoll.delete(&self.fd);
            self.read_chan.close();
            let _ = self.waker.wakeup();

            // In-flight outbound messages are dropped (no retry after
            // close), but their buffers still go back to the pool so the
            // free-list accounting stays correct across a shutdown.
            let mut state = self.state.lock().unwrap();
            for msg in state.queue.drain(..) {
                self.pool.release(msg);
            }
            drop(state);

            self.handler.on_event_loop_closed(err.as_ref());
            let _ = self.closed_tx.send(ClosedNotice { id: self.id, err });
        });
    }
}
