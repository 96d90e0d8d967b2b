//! Bounded blocking handoff channel between the poller thread and the reader
//! task.
//!
//! A small bounded blocking queue, widened with a capacity bound and a close
//! latch: when the channel is full, `send`
//! blocks the *producer* rather than dropping, because the design favours
//! the poller stalling over a datagram being silently discarded on the
//! application side.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    closed: Mutex<bool>,
}

/// A single-producer-conceptually, single-consumer bounded channel. Multiple
/// clones may call `send`/`recv`; the loop uses exactly one of each.
#[derive(Clone)]
pub struct Handoff<T> {
    inner: Arc<Shared<T>>,
}

/// Returned by `recv` once the channel has been closed and drained.
pub struct Closed;

impl<T> Handoff<T> {
    pub fn with_capacity(capacity: usize) -> Handoff<T> {
        Handoff {
            inner: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity,
                closed: Mutex::new(false),
            }),
        }
    }

    /// Blocks until there is room, then pushes `value`. Returns `Err(value)`
    /// if the channel is closed before room becomes available.
    pub fn send(&self, value: T) -> Result<(), T> {
        let mut queue = self.inner.queue.lock().unwrap();

        loop {
            if *self.inner.closed.lock().unwrap() {
                return Err(value);
            }

            if queue.len() < self.inner.capacity {
                queue.push_back(value);
                self.inner.not_empty.notify_one();
                return Ok(());
            }

            queue = self.inner.not_full.wait(queue).unwrap();
        }
    }

    /// Blocks until a value is available or the channel is closed and
    /// drained.
    pub fn recv(&self) -> Result<T, Closed> {
        let mut queue = self.inner.queue.lock().unwrap();

        loop {
            if let Some(value) = queue.pop_front() {
                self.inner.not_full.notify_one();
                return Ok(value);
            }

            if *self.inner.closed.lock().unwrap() {
                return Err(Closed);
            }

            queue = self.inner.not_empty.wait(queue).unwrap();
        }
    }

    /// Marks the channel closed and wakes every blocked sender and receiver.
    /// The reader task keeps draining already-queued values until `recv`
    /// observes both "empty" and "closed".
    pub fn close(&self) {
        *self.inner.closed.lock().unwrap() = true;
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn send_and_recv_in_order() {
        let ch: Handoff<u32> = Handoff::with_capacity(4);
        ch.send(1).unwrap();
        ch.send(2).unwrap();
        assert_eq!(ch.recv().ok(), Some(1));
        assert_eq!(ch.recv().ok(), Some(2));
    }

    #[test]
    fn send_blocks_producer_when_full() {
        let ch: Handoff<u32> = Handoff::with_capacity(1);
        ch.send(1).unwrap();

        let ch2 = ch.clone();
        let handle = thread::spawn(move || {
            ch2.send(2).unwrap();
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        assert_eq!(ch.recv().ok(), Some(1));
        handle.join().unwrap();
        assert_eq!(ch.recv().ok(), Some(2));
    }

    #[test]
    fn close_wakes_blocked_recv() {
        let ch: Handoff<u32> = Handoff::with_capacity(4);
        let ch2 = ch.clone();

        let handle = thread::spawn(move || ch2.recv().is_err());

        thread::sleep(Duration::from_millis(20));
        ch.close();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn send_after_close_fails() {
        let ch: Handoff<u32> = Handoff::with_capacity(1);
        ch.close();
        assert_eq!(ch.send(7), Err(7));
    }
}
