//! Peer address encoding/decoding: `sockaddr_in`/`sockaddr_in6` <-> `PeerAddr`.
//!
//! IPv6 carries an optional zone (interface name, or the decimal scope id if
//! the interface can no longer be resolved). IPv4 has no zone concept; unlike
//! the source this crate was distilled from, we never reinterpret raw name
//! bytes as a zone for an IPv4 peer.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// A decoded datagram peer: an IP address, port and (for IPv6) a zone string.
///
/// `zone` is always empty for IPv4. For IPv6 it is the resolved interface
/// name when the scope id maps to a live interface, the decimal scope id
/// when it doesn't, or empty when the scope id is zero.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    addr: SocketAddr,
    zone: String,
}

impl PeerAddr {
    pub fn new(addr: SocketAddr, zone: String) -> PeerAddr {
        PeerAddr { addr, zone }
    }

    pub fn from_socket_addr(addr: SocketAddr) -> PeerAddr {
        match addr {
            SocketAddr::V4(_) => PeerAddr { addr, zone: String::new() },
            SocketAddr::V6(v6) => {
                let zone = zone_id_to_string(v6.scope_id());
                PeerAddr { addr, zone }
            }
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Resolves `self.zone` back to a numeric scope id, rebuilding a
    /// `SocketAddrV6` that carries it. For IPv4 this is a no-op.
    pub fn with_resolved_scope(&self) -> SocketAddr {
        match self.addr {
            SocketAddr::V4(_) => self.addr,
            SocketAddr::V6(v6) => {
                let scope_id = string_to_zone_id(&self.zone);
                SocketAddr::V6(SocketAddrV6::new(*v6.ip(), v6.port(), v6.flowinfo(), scope_id))
            }
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> PeerAddr {
        PeerAddr::from_socket_addr(addr)
    }
}

/// Resolves a 32-bit scope id to a zone string: interface name if
/// resolvable, else the decimal scope id, else empty for a zero scope.
pub fn zone_id_to_string(scope_id: u32) -> String {
    if scope_id == 0 {
        return String::new();
    }

    let mut buf = [0u8; libc::IF_NAMESIZE];
    let name = unsafe { libc::if_indextoname(scope_id, buf.as_mut_ptr() as *mut libc::c_char) };

    if !name.is_null() {
        let cstr = unsafe { std::ffi::CStr::from_ptr(name) };
        if let Ok(s) = cstr.to_str() {
            return s.to_owned();
        }
    }

    scope_id.to_string()
}

/// Resolves a zone string to a numeric scope id: interface name lookup first,
/// decimal parse as fallback. An empty zone maps to scope id 0.
pub fn string_to_zone_id(zone: &str) -> u32 {
    if zone.is_empty() {
        return 0;
    }

    if let Ok(cname) = std::ffi::CString::new(zone) {
        let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if idx != 0 {
            return idx;
        }
    }

    zone.parse().unwrap_or(0)
}

/// Decodes a `sockaddr_storage` filled in by `recvmmsg`'s name field. Dispatch
/// is on the leading `sa_family_t`, matching the wire layout the kernel uses.
pub fn decode_sockaddr(storage: &libc::sockaddr_storage, len: usize) -> io::Result<PeerAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            if len < mem::size_of::<libc::sockaddr_in>() {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "short sockaddr_in"));
            }
            let sin: libc::sockaddr_in = unsafe { *(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            let port = u16::from_be(sin.sin_port);
            Ok(PeerAddr { addr: SocketAddr::V4(SocketAddrV4::new(ip, port)), zone: String::new() })
        }
        libc::AF_INET6 => {
            if len < mem::size_of::<libc::sockaddr_in6>() {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "short sockaddr_in6"));
            }
            let sin6: libc::sockaddr_in6 = unsafe { *(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            let port = u16::from_be(sin6.sin6_port);
            let scope_id = sin6.sin6_scope_id;
            let zone = zone_id_to_string(scope_id);
            let addr = SocketAddr::V6(SocketAddrV6::new(ip, port, sin6.sin6_flowinfo, scope_id));
            Ok(PeerAddr { addr, zone })
        }
        _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "unknown sockaddr family")),
    }
}

/// Encodes a peer address into a `sockaddr_storage`, resolving its zone back
/// to a numeric scope id for IPv6. Returns the region and its valid length.
pub fn encode_sockaddr(peer: &PeerAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

    match peer.addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from(*v4.ip()).to_be() },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            (storage, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let scope_id = string_to_zone_id(&peer.zone);
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: scope_id,
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            (storage, mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_scope_is_empty_zone() {
        assert_eq!(zone_id_to_string(0), "");
    }

    #[test]
    fn numeric_fallback_round_trips() {
        // An id unlikely to correspond to a live interface in test sandboxes.
        let id = 0xfffe;
        let zone = zone_id_to_string(id);
        assert_eq!(zone, id.to_string());
        assert_eq!(string_to_zone_id(&zone), id);
    }

    #[test]
    fn ipv4_zone_is_always_empty() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let peer = PeerAddr::from_socket_addr(addr);
        assert!(peer.zone().is_empty());
    }

    #[test]
    fn sockaddr_round_trip_v4() {
        let addr: SocketAddr = "203.0.113.9:4242".parse().unwrap();
        let peer = PeerAddr::from_socket_addr(addr);
        let (storage, len) = encode_sockaddr(&peer);
        let decoded = decode_sockaddr(&storage, len as usize).unwrap();
        assert_eq!(decoded.ip(), peer.ip());
        assert_eq!(decoded.port(), peer.port());
        assert!(decoded.zone().is_empty());
    }

    #[test]
    fn sockaddr_round_trip_v6() {
        let addr: SocketAddr = "[::1]:4242".parse().unwrap();
        let peer = PeerAddr::from_socket_addr(addr);
        let (storage, len) = encode_sockaddr(&peer);
        let decoded = decode_sockaddr(&storage, len as usize).unwrap();
        assert_eq!(decoded.ip(), peer.ip());
        assert_eq!(decoded.port(), peer.port());
    }
}
