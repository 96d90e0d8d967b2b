//! Free-list pool for `OutboundMessage` buffers.
//!
//! Backed by `concurrent_queue::ConcurrentQueue`, which gives the thread-safe
//! free-list semantics needed here without a mutex: producers on arbitrary
//! external threads return buffers to the pool, the loop's own thread takes
//! them back out, and neither side blocks the other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use concurrent_queue::ConcurrentQueue;

use crate::addr::PeerAddr;

/// A pooled outbound datagram: reused across enqueue/drain cycles instead of
/// reallocated, reserving `mtu` bytes on first use.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub peer: PeerAddr,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    fn with_capacity(mtu: usize) -> OutboundMessage {
        OutboundMessage {
            peer: PeerAddr::new("0.0.0.0:0".parse().unwrap(), String::new()),
            payload: Vec::with_capacity(mtu),
        }
    }

    fn fill(&mut self, peer: PeerAddr, payload: &[u8]) {
        self.peer = peer;
        self.payload.clear();
        self.payload.extend_from_slice(payload);
    }
}

/// Tracks the live (dequeued, not yet returned) buffer count so tests can
/// assert on the `high_water_mark` it reaches under load.
pub struct MessagePool {
    free: ConcurrentQueue<OutboundMessage>,
    mtu: usize,
    live: AtomicUsize,
    high_water_mark: AtomicUsize,
}

impl MessagePool {
    pub fn new(mtu: usize) -> Arc<MessagePool> {
        Arc::new(MessagePool {
            free: ConcurrentQueue::unbounded(),
            mtu,
            live: AtomicUsize::new(0),
            high_water_mark: AtomicUsize::new(0),
        })
    }

    /// Takes a buffer from the free-list, allocating a fresh one on first
    /// use if the list is empty, and fills it with `peer`/`payload`.
    pub fn acquire(&self, peer: PeerAddr, payload: &[u8]) -> OutboundMessage {
        let mut msg = self.free.pop().unwrap_or_else(|_| OutboundMessage::with_capacity(self.mtu));
        msg.fill(peer, payload);

        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        self.high_water_mark.fetch_max(live, Ordering::Relaxed);

        msg
    }

    /// Returns a buffer to the free-list after a successful `sendmmsg` slot
    /// or a fatal send.
    pub fn release(&self, msg: OutboundMessage) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        // An unbounded queue never rejects a push; errors here are
        // unreachable short of the pool itself being closed, which never
        // happens -- dropping the buffer on that impossible path is fine.
        let _ = self.free.push(msg);
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trips() {
        let pool = MessagePool::new(1500);
        let peer = PeerAddr::from_socket_addr("127.0.0.1:9000".parse().unwrap());

        let msg = pool.acquire(peer.clone(), b"hello");
        assert_eq!(pool.live_count(), 1);
        assert_eq!(msg.payload, b"hello");

        pool.release(msg);
        assert_eq!(pool.live_count(), 0);

        let msg2 = pool.acquire(peer, b"again");
        assert_eq!(msg2.payload, b"again");
        assert_eq!(pool.high_water_mark(), 1);
    }
}
