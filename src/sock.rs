//! UDP socket creation: resolve, open, tune, bind.

use std::io;
use std::mem;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use libc::{c_int, c_void, socklen_t};

use crate::addr::encode_sockaddr;
use crate::error::{UdpError, UdpResult};
use crate::sys::fd::FileDesc;

/// Which UDP address family a socket should bind: `"udp"` dual-stack,
/// `"udp4"` IPv4-only, `"udp6"` IPv6-only.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Network {
    Udp,
    Udp4,
    Udp6,
}

impl Network {
    pub fn parse(s: &str) -> UdpResult<Network> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            _ => Err(UdpError::AddressResolutionFailed(format!("unsupported network {:?}", s))),
        }
    }
}

/// A bound, non-blocking, close-on-exec UDP socket.
#[derive(Debug)]
pub struct UdpSocket {
    fd: FileDesc,
    local_addr: SocketAddr,
}

impl UdpSocket {
    /// Resolves `addr`, opens a `SOCK_DGRAM` socket of the matching family,
    /// optionally sets `SO_REUSEPORT` (must happen before bind),
    /// then binds.
    pub fn bind(network: Network, addr: &str, reuse_port: bool) -> UdpResult<UdpSocket> {
        let (unzoned, zone) = strip_zone(addr);
        let resolved = resolve(network, &unzoned)?;

        let family = match resolved {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };

        let raw_fd = unsafe { libc::socket(family, libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, libc::IPPROTO_UDP) };
        if raw_fd == -1 {
            return Err(UdpError::SocketCreateFailed(io::Error::last_os_error()));
        }
        let fd = unsafe { FileDesc::new(raw_fd) };

        if reuse_port {
            if let Err(e) = setsockopt_int(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_REUSEPORT, 1) {
                return Err(UdpError::SetsockoptFailed(e));
            }
        }

        let peer = match (resolved, zone) {
            (SocketAddr::V6(_), Some(zone)) => crate::addr::PeerAddr::new(resolved, zone),
            _ => crate::addr::PeerAddr::from_socket_addr(resolved),
        };
        let (storage, len) = encode_sockaddr(&peer);
        let rc = unsafe { libc::bind(fd.as_raw_fd(), &storage as *const _ as *const libc::sockaddr, len) };
        if rc == -1 {
            return Err(UdpError::BindFailed(io::Error::last_os_error()));
        }

        let local_addr = local_addr_of(fd.as_raw_fd()).unwrap_or(resolved);

        Ok(UdpSocket { fd, local_addr })
    }

    /// Best-effort widening of the kernel send/receive buffers. Tries the
    /// privileged `*FORCE` variants first (can exceed `net.core.*_max`),
    /// falling back to the unprivileged setters on `EPERM`.
    pub fn set_buffer_sizes(&self, recv: Option<usize>, send: Option<usize>) -> io::Result<()> {
        if let Some(n) = recv {
            set_buf_opt(self.fd.as_raw_fd(), libc::SO_RCVBUFFORCE, libc::SO_RCVBUF, n)?;
        }
        if let Some(n) = send {
            set_buf_opt(self.fd.as_raw_fd(), libc::SO_SNDBUFFORCE, libc::SO_SNDBUF, n)?;
        }
        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_ipv4(&self) -> bool {
        self.local_addr.is_ipv4()
    }
}

impl AsRawFd for UdpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for UdpSocket {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl FromRawFd for UdpSocket {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        let local_addr = local_addr_of(fd).unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
        UdpSocket { fd: FileDesc::new(fd), local_addr }
    }
}

/// Splits an interface/scope zone out of a bracketed IPv6 literal, e.g.
/// `"[::1%lo]:0"` -> (`"[::1]:0"`, `Some("lo")`). `std::net`'s own address
/// parsing has no notion of the `%zone` syntax, so this has to happen before
/// anything is handed to `ToSocketAddrs`. Addresses with no `%` are returned
/// unchanged.
fn strip_zone(addr: &str) -> (String, Option<String>) {
    let unzoned = || (addr.to_string(), None);

    match (addr.find('['), addr.find(']')) {
        (Some(open), Some(close)) if open < close => {
            let inner = &addr[open + 1..close];
            match inner.find('%') {
                Some(pct) => {
                    let (ip, zone) = inner.split_at(pct);
                    let zone = &zone[1..];
                    let stripped = format!("{}[{}]{}", &addr[..open], ip, &addr[close + 1..]);
                    (stripped, Some(zone.to_string()))
                }
                None => unzoned(),
            }
        }
        _ => unzoned(),
    }
}

fn resolve(network: Network, addr: &str) -> UdpResult<SocketAddr> {
    let mut candidates = addr
        .to_socket_addrs()
        .map_err(|e| UdpError::AddressResolutionFailed(e.to_string()))?;

    match network {
        Network::Udp => candidates
            .next()
            .ok_or_else(|| UdpError::AddressResolutionFailed(format!("no addresses for {:?}", addr))),
        Network::Udp4 => candidates
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| UdpError::AddressResolutionFailed(format!("no IPv4 address for {:?}", addr))),
        Network::Udp6 => candidates
            .find(SocketAddr::is_ipv6)
            .ok_or_else(|| UdpError::AddressResolutionFailed(format!("no IPv6 address for {:?}", addr))),
    }
}

fn local_addr_of(fd: RawFd) -> io::Result<SocketAddr> {
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of_val(&storage) as socklen_t;
        let rc = libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len);
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        crate::addr::decode_sockaddr(&storage, len as usize).map(|p| p.socket_addr())
    }
}

fn setsockopt_int(fd: RawFd, level: c_int, name: c_int, val: c_int) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &val as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        )
    };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn set_buf_opt(fd: RawFd, forced: c_int, plain: c_int, size: usize) -> io::Result<()> {
    let val = size as c_int;
    match setsockopt_int(fd, libc::SOL_SOCKET, forced, val) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
            setsockopt_int(fd, libc::SOL_SOCKET, plain, val)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_zone_splits_interface_name() {
        let (addr, zone) = strip_zone("[::1%lo]:0");
        assert_eq!(addr, "[::1]:0");
        assert_eq!(zone.as_deref(), Some("lo"));
    }

    #[test]
    fn strip_zone_leaves_plain_v6_alone() {
        let (addr, zone) = strip_zone("[::1]:8080");
        assert_eq!(addr, "[::1]:8080");
        assert_eq!(zone, None);
    }

    #[test]
    fn strip_zone_leaves_v4_alone() {
        let (addr, zone) = strip_zone("127.0.0.1:8080");
        assert_eq!(addr, "127.0.0.1:8080");
        assert_eq!(zone, None);
    }

    #[test]
    fn strip_zone_handles_numeric_scope() {
        let (addr, zone) = strip_zone("[fe80::1%2]:53");
        assert_eq!(addr, "[fe80::1]:53");
        assert_eq!(zone.as_deref(), Some("2"));
    }
}
