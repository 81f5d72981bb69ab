//! Server driver: bind, accept, handshake.
//!
//! Each accepted socket becomes a connection registered under the
//! provisional `remote host:port` key. The server immediately advertises
//! its own UID (always the literal `"Server"`) with an `+identity+` record;
//! the connection turns ready once the client's advertisement arrives and
//! the reader rekeys the pool entry.

use {
    crate::{
        conn::{ConnContext, Connection},
        message::{Envelope, IDENTITY},
    },
    log::{debug, error, info},
    std::net::SocketAddr,
    tokio::net::{TcpListener, TcpSocket},
};

/// Bind a listener with `SO_REUSEADDR`, so a restarted server can reclaim
/// a port whose previous sockets linger in TIME_WAIT.
pub(crate) fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// Accept connections until the listener task is aborted by `close`.
pub(crate) async fn accept_loop(listener: TcpListener, ctx: ConnContext) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("accepted connection from {addr}");
                let (conn, _) = Connection::spawn(stream, addr, false, ctx.clone());
                let uid = ctx.uid.read().clone();
                let hello = Envelope::new(uid.clone(), "", IDENTITY, uid.into_bytes());
                if conn.submit(hello).await.is_err() {
                    info!("connection {addr} died before handshake");
                    conn.teardown(&ctx.pool);
                }
            }
            Err(e) => {
                error!("accept error: {e}");
            }
        }
    }
}
