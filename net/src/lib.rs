//! duplex: a symmetric peer-to-peer RPC framework over persistent TCP.
//!
//! Peers are equals: both ends of a connection register handlers, initiate
//! named operations, and answer them. A node runs in one of two deployment
//! roles — a *server* that accepts inbound connections, or a *client* that
//! dials a single server in long-lived or short-lived mode. After a brief
//! identity exchange either side can push requests carrying opaque byte
//! payloads.
//!
//! ## Architecture
//!
//! ```text
//!  bytes --> FrameCodec --> Envelope --> inbound queue --> Dispatcher
//!                                                             |
//!                              handler (one task per record) <-+
//!                                                             |
//!  bytes <-- FrameCodec <-- Envelope <-- outbound queue <-- reply routing
//! ```
//!
//! Per node: one dispatcher task, one accept or dial task, and per
//! connection a reader and a writer task plus one task per in-flight
//! handler. All queues are bounded; a blocked producer is the intended
//! backpressure signal.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]   | `NetConfig` tunables and role-default timeouts |
//! | [`message`]  | The six-field wire record, status codes, reserved operations |
//! | [`frame`]    | Magic-header + u32-be length framing with resync |
//! | [`conn`]     | Connection object: socket halves, reader/writer tasks |
//! | [`pool`]     | UID-keyed connection pool with handshake rekeying |
//! | [`dispatch`] | Handler table, reserved handlers, reply routing |
//! | [`node`]     | `NodeBuilder` / `Node`: the lifecycle facade |
//! | [`error`]    | Crate-wide error enum |
//!
//! ## A minimal echo pair
//!
//! ```no_run
//! use duplex_net::{Envelope, NodeBuilder};
//!
//! # async fn run() -> duplex_net::Result<()> {
//! let server = NodeBuilder::new()
//!     .handler("echo", |req: Envelope| Some(Envelope::reply(req.body)))
//!     .server(9988)
//!     .await?;
//!
//! let client = NodeBuilder::new()
//!     .handler("echo", |req: Envelope| {
//!         println!("echoed back: {:?}", req.body);
//!         None
//!     })
//!     .client("127.0.0.1", 9988)
//!     .await?;
//!
//! client.request(b"hi".to_vec(), "echo", None).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod message;
pub mod node;
pub mod pool;

mod client;
mod server;

pub use {
    config::NetConfig,
    conn::Connection,
    dispatch::{Api, Handler},
    error::{NetError, Result},
    frame::FrameCodec,
    message::{Envelope, FAILURE, HEARTBEAT, IDENTITY, ILLEGAL, SUCCESS},
    node::{Mode, Node, NodeBuilder},
    pool::ConnPool,
};
