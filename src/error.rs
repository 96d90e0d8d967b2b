//! Error taxonomy, per the error handling design: startup errors, transient
//! I/O, fatal I/O, protocol mis-use and lifecycle errors are each their own
//! variant rather than folded into one generic "io error" bucket, since
//! callers branch on which bucket they got.

use std::error::Error;
use std::fmt;
use std::io;

pub type UdpResult<T> = Result<T, UdpError>;

#[derive(Debug)]
pub enum UdpError {
    /// `network`/`addr` failed to resolve to a usable socket address.
    AddressResolutionFailed(String),
    /// `socket(2)` failed.
    SocketCreateFailed(io::Error),
    /// `setsockopt(2)` failed (e.g. `SO_REUSEPORT`).
    SetsockoptFailed(io::Error),
    /// `bind(2)` failed.
    BindFailed(io::Error),
    /// A send/recv errno other than `EAGAIN`/`EWOULDBLOCK`/`EINTR`, or a
    /// poller errno other than `EINTR`. Fatal to the owning loop.
    Fatal(io::Error),
    /// A `WriteToN` message had a missing address or a payload that could
    /// not be accepted (rejected synchronously, no loop state change).
    InvalidMessage(&'static str),
    /// A send was attempted after `Shutdown()`.
    ServerClosed,
}

impl fmt::Display for UdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdpError::AddressResolutionFailed(msg) => write!(f, "address resolution failed: {}", msg),
            UdpError::SocketCreateFailed(e) => write!(f, "socket create failed: {}", e),
            UdpError::SetsockoptFailed(e) => write!(f, "setsockopt failed: {}", e),
            UdpError::BindFailed(e) => write!(f, "bind failed: {}", e),
            UdpError::Fatal(e) => write!(f, "fatal I/O error: {}", e),
            UdpError::InvalidMessage(msg) => write!(f, "invalid message: {}", msg),
            UdpError::ServerClosed => write!(f, "server closed"),
        }
    }
}

impl Error for UdpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UdpError::SocketCreateFailed(e)
            | UdpError::SetsockoptFailed(e)
            | UdpError::BindFailed(e)
            | UdpError::Fatal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for UdpError {
    fn from(e: io::Error) -> UdpError {
        UdpError::Fatal(e)
    }
}

/// Classifies a raw I/O error from a send/recv call as recoverable or fatal.
pub fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
