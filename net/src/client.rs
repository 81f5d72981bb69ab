//! Client driver: dial, handshake, heartbeat, reconnect.
//!
//! Long mode keeps exactly one connection to the server alive: the dial
//! loop redials after a short back-off whenever the connection drops, and a
//! heartbeat task keeps the server's read deadline fresh while the link is
//! idle. Short mode has no background loop at all; `request` dials lazily
//! and the dispatcher closes the connection once a handler stays silent.

use {
    crate::{
        conn::{ConnContext, Connection},
        error::Result,
        message::{Envelope, HEARTBEAT, IDENTITY},
    },
    log::{debug, info},
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::{net::TcpStream, task::JoinHandle, time::sleep},
};

/// Dial the server once and run the handshake opening. The returned join
/// handle resolves when the connection dies.
pub(crate) async fn dial_once(
    server_addr: &str,
    port: u16,
    short: bool,
    ctx: &ConnContext,
) -> Result<(Arc<Connection>, JoinHandle<()>)> {
    let stream = TcpStream::connect((server_addr, port)).await?;
    let remote_addr = stream.peer_addr()?;

    // The default client UID is the local socket's host:port, fixed on the
    // first successful dial so it survives reconnections unchanged.
    if ctx.uid.read().is_empty() {
        if let Ok(local_addr) = stream.local_addr() {
            let mut uid = ctx.uid.write();
            if uid.is_empty() {
                *uid = local_addr.to_string();
            }
        }
    }

    let (conn, reader) = Connection::spawn(stream, remote_addr, short, ctx.clone());
    let uid = ctx.uid.read().clone();
    let hello = Envelope::new(uid.clone(), "", IDENTITY, uid.into_bytes());
    conn.submit(hello).await?;
    info!("dialed {remote_addr}, advertising as {}", ctx.uid.read());
    Ok((conn, reader))
}

/// Long-mode driver: keep one connection up until the node closes.
pub(crate) async fn dial_loop(
    server_addr: String,
    port: u16,
    ctx: ConnContext,
    reconnect_interval: Duration,
    closed: Arc<AtomicBool>,
) {
    loop {
        if closed.load(Ordering::SeqCst) {
            break;
        }
        match dial_once(&server_addr, port, false, &ctx).await {
            Ok((conn, reader)) => {
                let heartbeat = tokio::spawn(heartbeat_loop(Arc::clone(&conn), ctx.timeout));
                let _ = reader.await;
                heartbeat.abort();
                if !closed.load(Ordering::SeqCst) {
                    info!("connection to {server_addr}:{port} lost, will redial");
                }
            }
            Err(e) => {
                debug!("dial {server_addr}:{port} failed: {e}");
            }
        }
        sleep(reconnect_interval).await;
    }
}

/// Emit heartbeats at half the idle deadline while the connection lives.
///
/// Half, not the full deadline: the client's own writes are what keep its
/// local idle timer fresh, and a cadence equal to the deadline would race
/// it. The server's (longer, 5 s default) deadline is refreshed by each
/// beat's arrival.
pub(crate) async fn heartbeat_loop(conn: Arc<Connection>, idle_timeout: Duration) {
    let period = idle_timeout / 2;
    loop {
        sleep(period).await;
        if conn.is_closed() {
            break;
        }
        if !conn.is_ready() {
            continue;
        }
        let beat = Envelope::new("", conn.peer_uid(), HEARTBEAT, Vec::new());
        if conn.submit(beat).await.is_err() {
            break;
        }
    }
}
