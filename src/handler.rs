//! The public callback surface a `Server` dispatches into.

use crate::addr::PeerAddr;
use crate::error::UdpError;

/// Implemented by the application. `on_readed` is invoked once per received
/// datagram; `payload` is only valid for the duration of the call, so an
/// implementation that wants to retain the bytes must copy them.
pub trait Handler: Send + Sync {
    fn on_readed(&self, payload: &[u8], peer: &PeerAddr);

    /// Reports a loop's terminal error, if any. Default is a no-op: not
    /// every application cares about per-loop lifecycle.
    fn on_event_loop_closed(&self, _err: Option<&UdpError>) {}
}
