//! Batched datagram I/O: one `recvmmsg`/`sendmmsg` call per invocation.
//!
//! `BatchIO` owns the scatter/gather arrays `recvmmsg` mutates in place, so a
//! single instance is reused call after call rather than allocated per poll.
//! Buffer sizing and the wire format mirror the UDP listener this crate's
//! conventions are grounded on, but the syscalls themselves go through
//! `libc::recvmmsg`/`libc::sendmmsg` rather than hand-rolled raw syscalls.

use std::io;
use std::os::unix::io::RawFd;

use libc::{c_void, mmsghdr, msghdr, sockaddr_storage, socklen_t, timespec};

use crate::addr::{decode_sockaddr, encode_sockaddr, PeerAddr};
use crate::error::{is_transient, UdpError, UdpResult};

/// One outbound datagram: a peer plus the bytes to send to it.
#[derive(Clone, Debug)]
pub struct OutMsg {
    pub peer: PeerAddr,
    pub payload: Vec<u8>,
}

struct RecvSlot {
    buf: Vec<u8>,
    name: sockaddr_storage,
    iov: libc::iovec,
}

/// Owns the `recvmmsg` receive arrays for one loop. Not `Send`+`Sync`: a
/// single reader task owns it exclusively, per the concurrency model.
pub struct BatchIO {
    fd: RawFd,
    mtu: usize,
    recv_slots: Vec<RecvSlot>,
    recv_hdrs: Vec<mmsghdr>,
}

/// Outcome of one batched send call's three-way drain outcome.
pub enum WriteOutcome {
    /// `EAGAIN`/`EINTR`: nothing (or only part) of the batch was accepted;
    /// the caller keeps the chunk queued and retries later.
    Retry,
    /// Any other errno: the caller closes the owning loop.
    Failed(io::Error),
    /// The kernel accepted `n` messages into its send queue.
    Succeed(usize),
}

impl BatchIO {
    /// Allocates the receive arrays for a batch width of `n` messages of up
    /// to `mtu` bytes each.
    pub fn new(fd: RawFd, n: usize, mtu: usize) -> BatchIO {
        let recv_slots: Vec<RecvSlot> = (0..n)
            .map(|_| RecvSlot {
                buf: vec![0u8; mtu],
                name: unsafe { std::mem::zeroed() },
                iov: unsafe { std::mem::zeroed() },
            })
            .collect();

        let recv_hdrs: Vec<mmsghdr> = (0..n).map(|_| unsafe { std::mem::zeroed() }).collect();

        let mut batch = BatchIO { fd, mtu, recv_slots, recv_hdrs };
        batch.reset_recv_headers();
        batch
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn batch_width(&self) -> usize {
        self.recv_slots.len()
    }

    /// Restores `iov_len`/`msg_namelen` to their original full-buffer sizes.
    /// `recvmmsg` shrinks both fields in place to reflect the bytes actually
    /// written, so a reset is needed before the next call.
    fn reset_recv_headers(&mut self) {
        for (slot, hdr) in self.recv_slots.iter_mut().zip(self.recv_hdrs.iter_mut()) {
            slot.iov.iov_base = slot.buf.as_mut_ptr() as *mut c_void;
            slot.iov.iov_len = slot.buf.len();
            slot.name = unsafe { std::mem::zeroed() };

            let hdr_inner: &mut msghdr = &mut hdr.msg_hdr;
            hdr_inner.msg_name = &mut slot.name as *mut _ as *mut c_void;
            hdr_inner.msg_namelen = std::mem::size_of::<sockaddr_storage>() as socklen_t;
            hdr_inner.msg_iov = &mut slot.iov as *mut libc::iovec;
            hdr_inner.msg_iovlen = 1;
            hdr_inner.msg_control = std::ptr::null_mut();
            hdr_inner.msg_controllen = 0;
            hdr_inner.msg_flags = 0;
            hdr.msg_len = 0;
        }
    }

    /// Issues one `recvmmsg(MSG_WAITFORONE)` call and invokes `f` once per
    /// message received, in kernel order. Returns the
    /// number of messages received (0 on `EAGAIN`/`EWOULDBLOCK`).
    pub fn read_batch<F>(&mut self, mut f: F) -> io::Result<usize>
    where
        F: FnMut(&[u8], &PeerAddr),
    {
        self.reset_recv_headers();

        let n = unsafe {
            libc::recvmmsg(
                self.fd,
                self.recv_hdrs.as_mut_ptr(),
                self.recv_hdrs.len() as u32,
                libc::MSG_WAITFORONE,
                std::ptr::null_mut::<timespec>(),
            )
        };

        if n == -1 {
            let e = io::Error::last_os_error();
            if is_transient(&e) {
                return Ok(0);
            }
            return Err(e);
        }

        let n = n as usize;
        for i in 0..n {
            let hdr = &self.recv_hdrs[i];
            let slot = &self.recv_slots[i];
            let namelen = hdr.msg_hdr.msg_namelen as usize;
            let peer = decode_sockaddr(&slot.name, namelen)?;
            let len = hdr.msg_len as usize;
            f(&slot.buf[..len], &peer);
        }

        Ok(n)
    }

    /// Issues one `sendto` for the fast path. Transient errno
    /// is returned verbatim so the caller can fall through to the slow path.
    pub fn write_to(&self, payload: &[u8], peer: &PeerAddr) -> io::Result<usize> {
        send_one(self.fd, self.mtu, payload, peer)
    }

    /// Builds a parallel header array pointing at the caller's payloads and
    /// freshly encoded peer addresses, then issues one `sendmmsg` call.
    /// Payloads longer than `mtu` are truncated rather than rejected; a
    /// message would be rejected before the syscall if it carried no
    /// address, but `OutMsg::peer` is not optional so that case cannot arise
    /// here.
    pub fn write_to_n(&self, messages: &[OutMsg]) -> WriteOutcome {
        write_to_n(self.fd, self.mtu, messages)
    }
}

/// The guts of `BatchIO::write_to_n`, usable from the poller thread without
/// going through a persistent `BatchIO`: unlike the receive side, a write
/// batch builds its header arrays fresh from the caller's own buffers each
/// call, so there is no shared mutable state to own exclusively.
pub fn write_to_n(fd: RawFd, mtu: usize, messages: &[OutMsg]) -> WriteOutcome {
    if messages.is_empty() {
        return WriteOutcome::Succeed(0);
    }

    let mut storages: Vec<(libc::sockaddr_storage, socklen_t)> =
        messages.iter().map(|m| encode_sockaddr(&m.peer)).collect();

    let mut iovecs: Vec<libc::iovec> = messages
        .iter()
        .map(|m| {
            let payload = truncate(&m.payload, mtu);
            libc::iovec {
                iov_base: payload.as_ptr() as *mut c_void,
                iov_len: payload.len(),
            }
        })
        .collect();

    let mut hdrs: Vec<mmsghdr> = Vec::with_capacity(messages.len());
    for i in 0..messages.len() {
        let mut msg_hdr: msghdr = unsafe { std::mem::zeroed() };
        msg_hdr.msg_name = &mut storages[i].0 as *mut _ as *mut c_void;
        msg_hdr.msg_namelen = storages[i].1;
        msg_hdr.msg_iov = &mut iovecs[i] as *mut libc::iovec;
        msg_hdr.msg_iovlen = 1;

        hdrs.push(mmsghdr { msg_hdr, msg_len: 0 });
    }

    let rc = unsafe { libc::sendmmsg(fd, hdrs.as_mut_ptr(), hdrs.len() as u32, 0) };

    if rc == -1 {
        let e = io::Error::last_os_error();
        if is_transient(&e) {
            WriteOutcome::Retry
        } else {
            WriteOutcome::Failed(e)
        }
    } else {
        WriteOutcome::Succeed(rc as usize)
    }
}

/// Validates a message before it is ever queued: rejected synchronously,
/// with no effect on loop state.
pub fn validate_outbound(payload: &[u8]) -> UdpResult<()> {
    if payload.is_empty() {
        return Err(UdpError::InvalidMessage("empty payload"));
    }
    Ok(())
}

/// `sendto` against a raw fd, usable from any thread: the kernel serializes
/// concurrent sends on one socket, unlike `recvmmsg`'s scatter/gather arrays
/// which only one thread may touch. This is what both `BatchIO::write_to`
/// and an `EventLoop`'s fast path call.
pub fn send_one(fd: RawFd, mtu: usize, payload: &[u8], peer: &PeerAddr) -> io::Result<usize> {
    let payload = truncate(payload, mtu);
    let (storage, len) = encode_sockaddr(peer);

    let rc = unsafe {
        libc::sendto(
            fd,
            payload.as_ptr() as *const c_void,
            payload.len(),
            0,
            &storage as *const _ as *const libc::sockaddr,
            len,
        )
    };

    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

fn truncate(payload: &[u8], mtu: usize) -> &[u8] {
    if payload.len() > mtu {
        &payload[..mtu]
    } else {
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as StdUdpSocket;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn echo_round_trip_single_loop() {
        let server = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_nonblocking(true).unwrap();
        let client = StdUdpSocket::bind("127.0.0.1:0").unwrap();

        client.send_to(b"ping", server.local_addr().unwrap()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut batch = BatchIO::new(server.as_raw_fd(), 8, 1500);
        let mut seen = Vec::new();
        batch.read_batch(|payload, peer| {
            seen.push((payload.to_vec(), peer.clone()));
        }).unwrap();

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, b"ping");
    }

    #[test]
    fn write_to_n_delivers_batch() {
        let server = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_nonblocking(true).unwrap();
        let client = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_nonblocking(true).unwrap();

        let batch = BatchIO::new(client.as_raw_fd(), 8, 1500);
        let peer = PeerAddr::from_socket_addr(server.local_addr().unwrap());
        let messages = vec![
            OutMsg { peer: peer.clone(), payload: b"one".to_vec() },
            OutMsg { peer: peer.clone(), payload: b"two".to_vec() },
        ];

        match batch.write_to_n(&messages) {
            WriteOutcome::Succeed(n) => assert_eq!(n, 2),
            WriteOutcome::Retry => panic!("unexpected retry"),
            WriteOutcome::Failed(e) => panic!("unexpected failure: {}", e),
        }
    }

    #[test]
    fn over_mtu_payload_is_truncated() {
        let payload = vec![7u8; 2000];
        let truncated = truncate(&payload, 1500);
        assert_eq!(truncated.len(), 1500);
    }
}
