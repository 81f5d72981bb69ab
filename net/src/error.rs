//! Error types for the duplex networking layer.

use thiserror::Error;

/// Errors that can occur in the networking and dispatch engine.
#[derive(Error, Debug)]
pub enum NetError {
    /// Failed to serialize or deserialize a wire record.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Payload exceeds the maximum allowed frame length.
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Actual payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The connection's outbound queue is gone; its tasks have exited.
    #[error("connection to {0} is closed")]
    ConnectionClosed(String),

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The inbound queue or the node itself has shut down.
    #[error("node closed")]
    Closed,

    /// The listener could not be bound at server start.
    #[error("bind failed on {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: std::net::SocketAddr,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Convenience result type for duplex networking operations.
pub type Result<T> = std::result::Result<T, NetError>;
