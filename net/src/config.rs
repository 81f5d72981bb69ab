//! Configuration for a duplex node.

use std::{net::IpAddr, time::Duration};

/// Default read-deadline for a node started in server mode.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read-deadline (and heartbeat base) for a node started in client mode.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(3);

/// Tunables for the networking and dispatch engine.
///
/// Every field has a production default; `timeout` is resolved per role at
/// start time when left unset (5 s for servers, 3 s for clients).
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Magic string prepended to every frame on the wire.
    /// Both ends must agree on it. Default: `"henrylee2cn"`.
    pub pack_header: String,

    /// Local address servers bind the listener on.
    /// Default: `0.0.0.0` (all interfaces).
    pub bind_host: IpAddr,

    /// Capacity of the shared inbound queue feeding the dispatcher.
    pub api_read_capacity: usize,

    /// Capacity of each connection's outbound queue.
    pub conn_write_capacity: usize,

    /// Size of each connection's read scratch buffer in bytes.
    pub conn_buffer_len: usize,

    /// Idle deadline for a connection, and the base for the client
    /// heartbeat cadence. `None` means "use the role default".
    pub timeout: Option<Duration>,

    /// Back-off between redial attempts in client long mode.
    pub reconnect_interval: Duration,

    /// Poll interval used by `request` while waiting for a ready peer.
    pub request_poll_interval: Duration,

    /// Hard cap on a single frame's payload length. Declared lengths above
    /// this are treated as mis-framing and skipped; outbound payloads above
    /// it are dropped with a log line.
    pub max_frame_len: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            pack_header: crate::frame::DEFAULT_PACK_HEADER.to_string(),
            bind_host: IpAddr::from([0, 0, 0, 0]),
            api_read_capacity: 4096,
            conn_write_capacity: 2048,
            conn_buffer_len: 1024,
            timeout: None,
            reconnect_interval: Duration::from_millis(500),
            request_poll_interval: Duration::from_millis(500),
            max_frame_len: 1_048_576, // 1 MiB
        }
    }
}

impl NetConfig {
    /// Create a config suitable for local testing: loopback binding, small
    /// buffers, and short intervals so liveness tests run in milliseconds.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            pack_header: crate::frame::DEFAULT_PACK_HEADER.to_string(),
            bind_host: IpAddr::from([127, 0, 0, 1]),
            api_read_capacity: 256,
            conn_write_capacity: 64,
            conn_buffer_len: 256,
            timeout: Some(Duration::from_secs(1)),
            reconnect_interval: Duration::from_millis(50),
            request_poll_interval: Duration::from_millis(25),
            max_frame_len: 1_048_576,
        }
    }
}
