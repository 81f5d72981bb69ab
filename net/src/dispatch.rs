//! Operation dispatch: the single consumer of the shared inbound queue.
//!
//! Every record popped off the queue is handed to a fresh task, so handler
//! invocations run concurrently and a slow handler never blocks the queue.
//! Replies leave a connection in handler-completion order, not request
//! arrival order.

use {
    crate::{
        conn::ConnContext,
        message::{Envelope, FAILURE, HEARTBEAT, IDENTITY, ILLEGAL},
        pool::ConnPool,
    },
    log::{debug, warn},
    parking_lot::RwLock,
    std::{collections::HashMap, sync::Arc},
    tokio::{sync::mpsc, task::JoinHandle},
};

/// A registered operation.
///
/// Handlers run concurrently, one task per inbound record; they receive the
/// record by value and return `Some(reply)` to answer or `None` to stay
/// silent. A silent handler on a short-lived connection closes it.
pub trait Handler: Send + Sync {
    /// Process one inbound record.
    fn process(&self, request: Envelope) -> Option<Envelope>;
}

impl<F> Handler for F
where
    F: Fn(Envelope) -> Option<Envelope> + Send + Sync,
{
    fn process(&self, request: Envelope) -> Option<Envelope> {
        self(request)
    }
}

/// The handler table: operation name to handler.
pub type Api = HashMap<String, Arc<dyn Handler>>;

/// Echoes an identity advertisement back by swapping `from` and `to`; the
/// dispatcher's defaulting pass then stamps the local UID into the empty
/// `from`, which is how a peer learns it.
struct IdentityEcho;

impl Handler for IdentityEcho {
    fn process(&self, mut request: Envelope) -> Option<Envelope> {
        std::mem::swap(&mut request.from, &mut request.to);
        Some(request)
    }
}

/// Swallows heartbeats. Receipt alone has already refreshed the idle
/// deadline by the time the record reaches the dispatcher.
struct HeartbeatSink;

impl Handler for HeartbeatSink {
    fn process(&self, _request: Envelope) -> Option<Envelope> {
        None
    }
}

/// Install the reserved operations, overriding any user entry of the same
/// name. Reserved entries always win.
pub(crate) fn reserve_api(api: &mut Api) {
    api.insert(IDENTITY.to_string(), Arc::new(IdentityEcho));
    api.insert(HEARTBEAT.to_string(), Arc::new(HeartbeatSink));
}

/// Consumes the inbound queue and fans records out to handler tasks.
pub(crate) struct Dispatcher {
    api: Arc<Api>,
    pool: Arc<ConnPool>,
    uid: Arc<RwLock<String>>,
}

impl Dispatcher {
    pub(crate) fn new(api: Arc<Api>, pool: Arc<ConnPool>, uid: Arc<RwLock<String>>) -> Self {
        Self { api, pool, uid }
    }

    /// Start the consumer loop. One task is spawned per inbound record.
    pub(crate) fn start(self, mut inbound: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        let this = Arc::new(self);
        tokio::spawn(async move {
            while let Some(request) = inbound.recv().await {
                let dispatcher = Arc::clone(&this);
                tokio::spawn(async move {
                    dispatcher.dispatch(request).await;
                });
            }
        })
    }

    async fn dispatch(&self, request: Envelope) {
        let requester = request.from.clone();
        let operation = request.operation.clone();
        let request_uid = request.uid.clone();

        let Some(handler) = self.api.get(&operation).cloned() else {
            warn!(
                "illegal request '{}' from {} ({})",
                operation,
                requester,
                self.pool.describe(&requester)
            );
            let mut reply = Envelope::error_reply(
                &request,
                ILLEGAL,
                format!("requested operation '{operation}' is not registered"),
            );
            reply.from = self.uid.read().clone();
            reply.to = requester.clone();
            self.route_or_drop(reply, &requester).await;
            return;
        };

        let Some(mut reply) = handler.process(request) else {
            // Silent handler: a short-lived originator is done with us.
            if let Some(conn) = self.pool.get(&requester) {
                if conn.is_short() {
                    debug!("closing short connection {requester} after silent handler");
                    conn.teardown(&self.pool);
                }
            }
            return;
        };

        if reply.to.is_empty() {
            reply.to = requester.clone();
        }
        if reply.operation.is_empty() {
            reply.operation = operation.clone();
        }
        if reply.from.is_empty() {
            reply.from = self.uid.read().clone();
        }

        let target = reply.to.clone();
        match self.pool.get(&target) {
            Some(conn) => {
                if conn.submit(reply).await.is_err() {
                    debug!("reply to {target} dropped: connection closed");
                }
            }
            None => {
                warn!("no connection for reply target '{target}', failing back to {requester}");
                let unroutable = Envelope {
                    body: format!("peer '{target}' is not connected").into_bytes(),
                    operation,
                    uid: request_uid,
                    from: self.uid.read().clone(),
                    to: requester.clone(),
                    status: FAILURE,
                };
                self.route_or_drop(unroutable, &requester).await;
            }
        }
    }

    /// Deliver a synthesized error to the requester, or drop it with a log
    /// line if the requester is gone.
    async fn route_or_drop(&self, reply: Envelope, requester: &str) {
        match self.pool.get(requester) {
            Some(conn) => {
                if conn.submit(reply).await.is_err() {
                    debug!("error reply to {requester} dropped: connection closed");
                }
            }
            None => warn!("requester {requester} no longer connected, dropping error reply"),
        }
    }
}

/// Spawn a dispatcher wired to a node's context. Convenience for the role
/// drivers, which all hold a [`ConnContext`].
pub(crate) fn start_with_ctx(
    api: Arc<Api>,
    ctx: &ConnContext,
    inbound: mpsc::Receiver<Envelope>,
) -> JoinHandle<()> {
    Dispatcher::new(api, Arc::clone(&ctx.pool), Arc::clone(&ctx.uid)).start(inbound)
}

// ── Tests ───────────────────────────────────────────────────────────────────
