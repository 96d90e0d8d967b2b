//! Construction-time tunables for `Server`: plain constructor parameters,
//! not environment variables or a config file.

/// Batch width, read-channel capacity, outbound chunk width and MTU for a
/// `Server`. Plain builder rather than a config-file/env crate: these are
/// constructor parameters, not process configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub(crate) network: String,
    pub(crate) addr: String,
    pub(crate) reuse_port: bool,
    pub(crate) listener_n: usize,
    pub(crate) mtu: usize,
    pub(crate) msg_hdr_size: usize,
    pub(crate) read_event_size: usize,
    pub(crate) write_event_size: usize,
    pub(crate) recv_buf_size: Option<usize>,
    pub(crate) send_buf_size: Option<usize>,
}

pub const DEFAULT_MTU: usize = 1500;
pub const DEFAULT_MSG_HDR_SIZE: usize = 128;
pub const DEFAULT_READ_EVENT_SIZE: usize = 128;
pub const DEFAULT_WRITE_EVENT_SIZE: usize = 128;

impl ServerConfig {
    pub fn new(network: impl Into<String>, addr: impl Into<String>) -> ServerConfig {
        ServerConfig {
            network: network.into(),
            addr: addr.into(),
            reuse_port: false,
            listener_n: 0,
            mtu: DEFAULT_MTU,
            msg_hdr_size: DEFAULT_MSG_HDR_SIZE,
            read_event_size: DEFAULT_READ_EVENT_SIZE,
            write_event_size: DEFAULT_WRITE_EVENT_SIZE,
            recv_buf_size: None,
            send_buf_size: None,
        }
    }

    pub fn reuse_port(mut self, reuse_port: bool) -> ServerConfig {
        self.reuse_port = reuse_port;
        self
    }

    /// `listener_n <= 0` (modeled here as 0) means: use the CPU count when
    /// `reuse_port` is set, else 1.
    pub fn listener_n(mut self, n: usize) -> ServerConfig {
        self.listener_n = n;
        self
    }

    pub fn mtu(mut self, mtu: usize) -> ServerConfig {
        self.mtu = mtu;
        self
    }

    pub fn msg_hdr_size(mut self, n: usize) -> ServerConfig {
        self.msg_hdr_size = n;
        self
    }

    pub fn read_event_size(mut self, n: usize) -> ServerConfig {
        self.read_event_size = n;
        self
    }

    pub fn write_event_size(mut self, n: usize) -> ServerConfig {
        self.write_event_size = n;
        self
    }

    pub fn recv_buf_size(mut self, n: usize) -> ServerConfig {
        self.recv_buf_size = Some(n);
        self
    }

    pub fn send_buf_size(mut self, n: usize) -> ServerConfig {
        self.send_buf_size = Some(n);
        self
    }

    pub(crate) fn resolved_listener_n(&self) -> usize {
        if self.listener_n > 0 {
            return self.listener_n;
        }

        if self.reuse_port {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            1
        }
    }
}
