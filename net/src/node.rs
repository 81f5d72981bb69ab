//! The public facade: build, start, request, close.
//!
//! Configuration happens on a [`NodeBuilder`] before role start; starting
//! in server or client mode consumes the builder and returns a [`Node`]
//! handle. The handle is cheap to clone and drives the running engine:
//! submitting requests, counting ready peers, closing connections.

use {
    crate::{
        client,
        config::{NetConfig, DEFAULT_CLIENT_TIMEOUT, DEFAULT_SERVER_TIMEOUT},
        conn::ConnContext,
        dispatch::{self, reserve_api, Api, Handler},
        error::{NetError, Result},
        frame::FrameCodec,
        message::Envelope,
        pool::ConnPool,
        server,
    },
    log::{debug, error, info},
    parking_lot::{Mutex, RwLock},
    std::{
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::{sync::mpsc, task::AbortHandle, time::sleep},
};

/// The deployment role a node was started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Accepts inbound connections.
    Server,
    /// Dials a single server address.
    Client,
}

/// Configures a node before role start. Setters are chainable; the role
/// start methods consume the builder.
///
/// ```no_run
/// # use duplex_net::{Envelope, NodeBuilder};
/// # async fn run() -> duplex_net::Result<()> {
/// let node = NodeBuilder::new()
///     .handler("echo", |req: Envelope| Some(Envelope::reply(req.body)))
///     .server(9988)
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct NodeBuilder {
    config: NetConfig,
    api: Api,
    uid: Option<String>,
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBuilder {
    /// Start from production defaults.
    pub fn new() -> Self {
        Self {
            config: NetConfig::default(),
            api: Api::new(),
            uid: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: NetConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a handler for an operation. Reserved operations are
    /// installed at start and always win over entries registered here.
    pub fn handler(mut self, operation: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.api.insert(operation.into(), Arc::new(handler));
        self
    }

    /// Merge a prebuilt handler table.
    pub fn api(mut self, api: Api) -> Self {
        self.api.extend(api);
        self
    }

    /// Override the node UID. Ignored in server mode, where the UID is
    /// always the literal `"Server"`; a client defaults to its local
    /// `host:port` on first dial.
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Set the frame magic string. Both ends must agree on it.
    pub fn pack_header(mut self, header: impl Into<String>) -> Self {
        self.config.pack_header = header.into();
        self
    }

    /// Capacity of the shared inbound queue.
    pub fn api_read_capacity(mut self, capacity: usize) -> Self {
        self.config.api_read_capacity = capacity;
        self
    }

    /// Capacity of each connection's outbound queue.
    pub fn conn_write_capacity(mut self, capacity: usize) -> Self {
        self.config.conn_write_capacity = capacity;
        self
    }

    /// Size of each connection's read scratch buffer.
    pub fn conn_buffer_len(mut self, len: usize) -> Self {
        self.config.conn_buffer_len = len;
        self
    }

    /// Idle deadline (and the base for the client heartbeat cadence).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Start in server mode: bind `port`, run the dispatcher and the
    /// accept loop. A bind failure is the one fatal startup error.
    pub async fn server(self, port: u16) -> Result<Node> {
        let Self { config, mut api, .. } = self;
        let timeout = config.timeout.unwrap_or(DEFAULT_SERVER_TIMEOUT);
        reserve_api(&mut api);

        let uid = Arc::new(RwLock::new("Server".to_string()));
        let (ctx, inbound_rx) = build_ctx(&config, timeout, Arc::clone(&uid));

        let bind_addr = SocketAddr::new(config.bind_host, port);
        let listener = server::bind_listener(bind_addr).map_err(|e| {
            error!("failed to bind {bind_addr}: {e}");
            NetError::Bind {
                addr: bind_addr,
                source: e,
            }
        })?;
        let local_addr = listener.local_addr()?;
        info!("server listening on {local_addr}");

        let dispatcher = dispatch::start_with_ctx(Arc::new(api), &ctx, inbound_rx);
        let accept = tokio::spawn(server::accept_loop(listener, ctx.clone()));

        Ok(Node {
            shared: Arc::new(NodeShared {
                mode: Mode::Server,
                short: false,
                uid,
                ctx,
                config,
                closed: Arc::new(AtomicBool::new(false)),
                tasks: Mutex::new(vec![dispatcher.abort_handle(), accept.abort_handle()]),
                local_addr: Some(local_addr),
                dial_target: None,
            }),
        })
    }

    /// Start in client long mode: dial `server_addr:port`, redial on loss,
    /// heartbeat while idle.
    pub async fn client(self, server_addr: impl Into<String>, port: u16) -> Result<Node> {
        self.start_client(server_addr.into(), port, false).await
    }

    /// Start in client short mode: no background dialing; each `request`
    /// dials as needed and the dispatcher closes the connection once a
    /// handler returns no reply.
    pub async fn client_short(self, server_addr: impl Into<String>, port: u16) -> Result<Node> {
        self.start_client(server_addr.into(), port, true).await
    }

    async fn start_client(self, server_addr: String, port: u16, short: bool) -> Result<Node> {
        let Self { config, mut api, uid } = self;
        let timeout = config.timeout.unwrap_or(DEFAULT_CLIENT_TIMEOUT);
        reserve_api(&mut api);

        let uid = Arc::new(RwLock::new(uid.unwrap_or_default()));
        let (ctx, inbound_rx) = build_ctx(&config, timeout, Arc::clone(&uid));

        let dispatcher = dispatch::start_with_ctx(Arc::new(api), &ctx, inbound_rx);
        let mut tasks = vec![dispatcher.abort_handle()];

        let shared = Arc::new(NodeShared {
            mode: Mode::Client,
            short,
            uid,
            ctx,
            config,
            closed: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            local_addr: None,
            dial_target: Some((server_addr.clone(), port)),
        });

        if !short {
            let dial = tokio::spawn(client::dial_loop(
                server_addr,
                port,
                shared.ctx.clone(),
                shared.config.reconnect_interval,
                Arc::clone(&shared.closed),
            ));
            tasks.push(dial.abort_handle());
        }
        *shared.tasks.lock() = tasks;

        Ok(Node { shared })
    }
}

fn build_ctx(
    config: &NetConfig,
    timeout: Duration,
    uid: Arc<RwLock<String>>,
) -> (ConnContext, mpsc::Receiver<Envelope>) {
    let (inbound, inbound_rx) = mpsc::channel(config.api_read_capacity);
    let ctx = ConnContext {
        codec: FrameCodec::new(&config.pack_header, config.max_frame_len),
        uid,
        timeout,
        buffer_len: config.conn_buffer_len,
        write_capacity: config.conn_write_capacity,
        inbound,
        pool: Arc::new(ConnPool::new()),
    };
    (ctx, inbound_rx)
}

struct NodeShared {
    mode: Mode,
    short: bool,
    uid: Arc<RwLock<String>>,
    ctx: ConnContext,
    config: NetConfig,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<AbortHandle>>,
    local_addr: Option<SocketAddr>,
    dial_target: Option<(String, u16)>,
}

/// Handle on a running node. Clones share the same engine.
#[derive(Clone)]
pub struct Node {
    shared: Arc<NodeShared>,
}

impl Node {
    /// Enqueue an outbound request.
    ///
    /// With `to = None`, blocks until at least one connection is ready and
    /// targets an arbitrary ready peer; with a UID, blocks (polling every
    /// `request_poll_interval`) until that peer is ready. In client short
    /// mode a request no pooled connection satisfies triggers a fresh
    /// dial, directed or not, once no handshake is already in flight.
    /// Returns an error only after `close`.
    pub async fn request(
        &self,
        body: impl Into<Vec<u8>>,
        operation: impl Into<String>,
        to: Option<&str>,
    ) -> Result<()> {
        let body = body.into();
        let operation = operation.into();
        loop {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(NetError::Closed);
            }

            let conn = match to {
                Some(uid) => self.shared.ctx.pool.get(uid).filter(|c| c.is_ready()),
                None => self.shared.ctx.pool.pick_ready(),
            };

            if let Some(conn) = conn {
                let msg = Envelope::new(self.uid(), conn.peer_uid(), operation.clone(), body.clone());
                if conn.submit(msg).await.is_ok() {
                    return Ok(());
                }
                // The connection died under us; fall through and retry.
            } else if self.shared.short && !self.shared.ctx.pool.has_pending() {
                // Nothing in the pool satisfies this request (directed or
                // not) and no handshake is in flight, so dial fresh. A
                // pending handshake is waited out rather than stacked on.
                if let Some((host, port)) = &self.shared.dial_target {
                    if let Err(e) = client::dial_once(host, *port, true, &self.shared.ctx).await {
                        debug!("short-mode dial {host}:{port} failed: {e}");
                    }
                }
            }

            sleep(self.shared.config.request_poll_interval).await;
        }
    }

    /// Close one peer's connection. Returns false if no such peer.
    pub fn close_peer(&self, uid: &str) -> bool {
        match self.shared.ctx.pool.remove(uid) {
            Some(conn) => {
                info!("closing connection {uid} ({})", conn.remote_addr());
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Close the listener (server mode), every connection, and the
    /// background tasks. Terminal: the node does not restart, and
    /// `request` fails afterwards.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(addr) = self.shared.local_addr {
            info!("server stopped listening on {addr}");
        }
        for task in self.shared.tasks.lock().drain(..) {
            task.abort();
        }
        for (uid, conn) in self.shared.ctx.pool.drain() {
            info!("closing connection {uid} ({})", conn.remote_addr());
            conn.close();
        }
    }

    /// The role this node was started in.
    pub fn mode(&self) -> Mode {
        self.shared.mode
    }

    /// This node's UID: `"Server"`, the configured client UID, or the
    /// local `host:port` once the first dial succeeded.
    pub fn uid(&self) -> String {
        self.shared.uid.read().clone()
    }

    /// Number of ready connections in the pool.
    pub fn count_nodes(&self) -> usize {
        self.shared.ctx.pool.count_ready()
    }

    /// The bound listener address (server mode), handy when the
    /// configured port was 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
