//! The wire record shared by the frame codec and the handler API.
//!
//! Every payload on the wire is a bincode encoding of [`Envelope`]. The six
//! fields always transit, possibly empty; `body` is opaque bytes end-to-end
//! and higher layers serialize their own structured payloads into it.

use {
    crate::error::Result,
    serde::{Deserialize, Serialize},
};

/// Status: the request was handled normally.
pub const SUCCESS: i64 = 0;
/// Status: the reply could not be routed to its target peer.
pub const FAILURE: i64 = -1;
/// Status: the requested operation is not registered on the receiver.
pub const ILLEGAL: i64 = -2;

/// Reserved operation: advertises a peer's UID during handshake.
/// The built-in handler echoes the advertisement back; user handler tables
/// cannot override it.
pub const IDENTITY: &str = "+identity+";

/// Reserved operation: keep-alive. The built-in handler returns no reply;
/// receipt alone refreshes the peer's read deadline.
pub const HEARTBEAT: &str = "+heartbeat+";

/// One message on the duplex network.
///
/// `from` and `to` are peer UIDs. An empty `from` is stamped by the sending
/// connection's writer (with the node UID) or by the receiving connection's
/// reader (with the known peer UID); an empty `to` on a handler reply is
/// filled by the dispatcher with the requester's UID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque payload bytes; never interpreted by the engine.
    pub body: Vec<u8>,
    /// Name of the handler to invoke on the receiver.
    pub operation: String,
    /// Correlation string set by the originator; propagated unchanged.
    pub uid: String,
    /// UID of the sending peer.
    pub from: String,
    /// UID of the receiving peer.
    pub to: String,
    /// Reserved codes 0 / -1 / -2; other values are application-defined.
    pub status: i64,
}

impl Envelope {
    /// Build a request with `status = SUCCESS`.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        operation: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            body: body.into(),
            operation: operation.into(),
            uid: String::new(),
            from: from.into(),
            to: to.into(),
            status: SUCCESS,
        }
    }

    /// Build a successful handler reply carrying only a body.
    ///
    /// Routing fields are left empty on purpose: the dispatcher fills
    /// `to` with the requester's UID, `operation` with the request's
    /// operation, and `from` with the local node UID.
    pub fn reply(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            status: SUCCESS,
            ..Self::default()
        }
    }

    /// Build an error reply for `request`, keeping its operation and
    /// correlation UID and replacing the body with `msg`.
    pub fn error_reply(request: &Envelope, status: i64, msg: impl Into<String>) -> Self {
        Self {
            body: msg.into().into_bytes(),
            operation: request.operation.clone(),
            uid: request.uid.clone(),
            from: String::new(),
            to: String::new(),
            status,
        }
    }

    /// Set the target peer.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    /// Set the operation explicitly instead of inheriting the request's.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Set an application status code.
    pub fn with_status(mut self, status: i64) -> Self {
        self.status = status;
        self
    }

    /// Serialize this record to payload bytes using bincode.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a record from payload bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
