//! One TCP connection: socket halves, outbound queue, reader + writer tasks.
//!
//! A [`Connection`] owns its socket. The writer task drains the bounded
//! outbound queue, stamps missing `from` fields with the node UID, frames,
//! and writes. The reader task pulls bytes into a scratch buffer, appends
//! them to the residual buffer, unpacks complete frames, and publishes the
//! decoded records onto the node's shared inbound queue.
//!
//! The reader is also where the identity handshake lands: the first
//! `+identity+` record decoded on a connection rekeys the pool entry from
//! the provisional `host:port` key to the peer's advertised UID and flips
//! the ready flag. A later `+identity+` on an already-ready connection is
//! the echo of our own advertisement coming back and is dropped.
//!
//! Liveness is an idle deadline: reads and writes both refresh the
//! last-activity instant, and the reader closes the connection once nothing
//! has moved for the configured timeout.

use {
    crate::{
        error::{NetError, Result},
        frame::FrameCodec,
        message::{Envelope, IDENTITY},
        pool::ConnPool,
    },
    log::{debug, info, warn},
    parking_lot::{Mutex, RwLock},
    std::{
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    },
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{
            tcp::{OwnedReadHalf, OwnedWriteHalf},
            TcpStream,
        },
        sync::mpsc,
        task::{AbortHandle, JoinHandle},
        time::timeout,
    },
};

/// Everything a connection's tasks need from the owning node.
#[derive(Clone)]
pub(crate) struct ConnContext {
    /// Frame codec shared by every connection of the node.
    pub codec: FrameCodec,
    /// The node's own UID. Empty for a client until its first dial.
    pub uid: Arc<RwLock<String>>,
    /// Idle deadline.
    pub timeout: Duration,
    /// Read scratch buffer length.
    pub buffer_len: usize,
    /// Outbound queue capacity.
    pub write_capacity: usize,
    /// The node's shared inbound queue.
    pub inbound: mpsc::Sender<Envelope>,
    /// The node's connection pool, for rekey and teardown.
    pub pool: Arc<ConnPool>,
}

/// State shared between a connection's two tasks and the rest of the node.
pub struct Connection {
    remote_addr: SocketAddr,
    /// Current pool key: provisional `host:port` until handshake, then the
    /// peer's advertised UID.
    peer_uid: Mutex<String>,
    outbound: mpsc::Sender<Envelope>,
    short: bool,
    ready: AtomicBool,
    closed: AtomicBool,
    last_active: Mutex<Instant>,
    sent: AtomicU64,
    received: AtomicU64,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl Connection {
    /// Wrap a freshly accepted or dialed socket, register it in the pool
    /// under the provisional `host:port` key, and start its reader and
    /// writer tasks. Returns the connection and the reader's join handle
    /// (which resolves when the connection dies).
    ///
    /// Registration happens before either task runs, so a peer identity
    /// racing in on the first read always finds the entry to rekey.
    pub(crate) fn spawn(
        stream: TcpStream,
        remote_addr: SocketAddr,
        short: bool,
        ctx: ConnContext,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(ctx.write_capacity);

        let conn = Arc::new(Self {
            remote_addr,
            peer_uid: Mutex::new(remote_addr.to_string()),
            outbound,
            short,
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_active: Mutex::new(Instant::now()),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        });

        if let Some(stale) = ctx.pool.insert(&remote_addr.to_string(), Arc::clone(&conn)) {
            warn!("replacing stale connection for {remote_addr}");
            stale.close();
        }

        let writer = tokio::spawn(writer_task(
            Arc::clone(&conn),
            outbound_rx,
            write_half,
            ctx.clone(),
        ));
        let reader = tokio::spawn(reader_task(Arc::clone(&conn), read_half, ctx));
        conn.tasks
            .lock()
            .extend([writer.abort_handle(), reader.abort_handle()]);
        (conn, reader)
    }

    /// A connection with no socket or tasks behind it. Pool-level tests
    /// use these to exercise keying without networking; `submit` on a
    /// detached connection always fails.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn detached(remote_addr: SocketAddr) -> Arc<Self> {
        let (outbound, _) = mpsc::channel(1);
        Arc::new(Self {
            remote_addr,
            peer_uid: Mutex::new(remote_addr.to_string()),
            outbound,
            short: false,
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_active: Mutex::new(Instant::now()),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue a record for the writer. Blocks while the outbound queue is
    /// full; that backpressure is the intended signal.
    pub async fn submit(&self, msg: Envelope) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| NetError::ConnectionClosed(self.peer_uid()))
    }

    /// True iff the identity handshake has completed and both tasks live.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// True once `close` has run (or a task died and closed the connection).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether this connection is flagged for closure as soon as a handler
    /// produces no reply (client short mode).
    pub fn is_short(&self) -> bool {
        self.short
    }

    /// Remote socket address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The peer's UID: `host:port` before handshake, advertised UID after.
    pub fn peer_uid(&self) -> String {
        self.peer_uid.lock().clone()
    }

    /// Records written to the socket.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Records decoded off the socket.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Time since the last successful read or write.
    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    /// Idempotent: shuts both tasks down and drops the socket halves.
    /// Queued outbound records are discarded, not delivered.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ready.store(false, Ordering::SeqCst);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Close and remove this connection from the pool, logging once.
    pub(crate) fn teardown(self: &Arc<Self>, pool: &ConnPool) {
        if let Some(key) = pool.remove_entry_for(self) {
            info!("connection {} ({}) closed", key, self.remote_addr);
        }
        self.close();
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    fn set_ready(&self, uid: String) {
        *self.peer_uid.lock() = uid;
        self.ready.store(true, Ordering::SeqCst);
    }
}

/// Drain the outbound queue onto the socket.
async fn writer_task(
    conn: Arc<Connection>,
    mut outbound: mpsc::Receiver<Envelope>,
    mut write_half: OwnedWriteHalf,
    ctx: ConnContext,
) {
    while let Some(mut msg) = outbound.recv().await {
        if msg.from.is_empty() {
            msg.from = ctx.uid.read().clone();
        }
        let payload = match msg.serialize() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping unencodable record for {}: {}", msg.to, e);
                continue;
            }
        };
        let frame = match ctx.codec.pack(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping outbound record for {}: {}", msg.to, e);
                continue;
            }
        };
        if let Err(e) = write_half.write_all(&frame).await {
            debug!("write error to {}: {}", conn.remote_addr(), e);
            break;
        }
        conn.touch();
        conn.sent.fetch_add(1, Ordering::Relaxed);
    }
    conn.teardown(&ctx.pool);
}

/// Pull bytes, unpack frames, publish decoded records inbound.
async fn reader_task(conn: Arc<Connection>, mut read_half: OwnedReadHalf, ctx: ConnContext) {
    let mut scratch = vec![0u8; ctx.buffer_len];
    let mut residual: Vec<u8> = Vec::new();

    'conn: loop {
        let read = match timeout(ctx.timeout, read_half.read(&mut scratch)).await {
            Err(_elapsed) => {
                // The timer raced a concurrent write refresh; only a truly
                // idle connection is dead.
                if conn.idle_for() >= ctx.timeout {
                    info!(
                        "peer {} ({}) timed out after {:?}",
                        conn.peer_uid(),
                        conn.remote_addr(),
                        ctx.timeout
                    );
                    break 'conn;
                }
                continue;
            }
            Ok(Err(e)) => {
                debug!("read error from {}: {}", conn.remote_addr(), e);
                break 'conn;
            }
            Ok(Ok(0)) => {
                debug!("peer {} closed the socket", conn.remote_addr());
                break 'conn;
            }
            Ok(Ok(read)) => read,
        };

        conn.touch();
        residual.extend_from_slice(&scratch[..read]);

        for payload in ctx.codec.unpack(&mut residual) {
            let mut msg = match Envelope::deserialize(&payload) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(
                        "dropping undecodable payload ({} bytes) from {}: {}",
                        payload.len(),
                        conn.remote_addr(),
                        e
                    );
                    continue;
                }
            };
            conn.received.fetch_add(1, Ordering::Relaxed);
            if msg.from.is_empty() {
                msg.from = conn.peer_uid();
            }

            if msg.operation == IDENTITY {
                if conn.is_ready() {
                    // Echo of our own advertisement; the handshake is done.
                    continue;
                }
                complete_handshake(&conn, &ctx, &msg);
            }

            if ctx.inbound.send(msg).await.is_err() {
                debug!("inbound queue closed, stopping reader for {}", conn.remote_addr());
                break 'conn;
            }
        }
    }

    conn.teardown(&ctx.pool);
}

/// Rekey the pool entry from the provisional `host:port` key to the UID the
/// peer advertised and mark the connection ready. The record still flows to
/// the dispatcher afterwards so the reserved handler echoes it back.
fn complete_handshake(conn: &Arc<Connection>, ctx: &ConnContext, msg: &Envelope) {
    let advertised = if msg.body.is_empty() {
        msg.from.clone()
    } else {
        String::from_utf8_lossy(&msg.body).into_owned()
    };
    let provisional = conn.peer_uid();
    if let Some(stale) = ctx.pool.rekey(&provisional, &advertised) {
        warn!("replacing stale connection for {}", advertised);
        stale.close();
    }
    conn.set_ready(advertised.clone());
    info!(
        "handshake complete with {} ({})",
        advertised,
        conn.remote_addr()
    );
}

// ── Tests ───────────────────────────────────────────────────────────────────
