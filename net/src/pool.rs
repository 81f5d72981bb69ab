//! Connection pool keyed by peer UID.
//!
//! Entries are inserted under a provisional `host:port` key at accept/dial
//! time and atomically rekeyed to the peer's advertised UID once the
//! identity handshake completes, so `host:port` keys exist only transiently.
//! At most one connection lives under any UID.

use {
    crate::conn::Connection,
    parking_lot::Mutex,
    rand::seq::SliceRandom,
    std::{collections::HashMap, net::SocketAddr, sync::Arc},
};

/// Mapping from peer UID to connection. All mutations happen under one
/// lock, so rekeying is atomic with respect to concurrent lookups.
#[derive(Default)]
pub struct ConnPool {
    conns: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `key`, returning any connection the
    /// insertion displaced (the caller is expected to close it).
    pub fn insert(&self, key: &str, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        self.conns.lock().insert(key.to_string(), conn)
    }

    /// Atomically move the entry at `old_key` to `new_key`.
    ///
    /// Returns the connection previously registered under `new_key`, if
    /// any. A missing `old_key` (the connection already died) is a no-op.
    pub fn rekey(&self, old_key: &str, new_key: &str) -> Option<Arc<Connection>> {
        let mut conns = self.conns.lock();
        let conn = conns.remove(old_key)?;
        conns.insert(new_key.to_string(), conn)
    }

    /// Look up the connection for `uid`.
    pub fn get(&self, uid: &str) -> Option<Arc<Connection>> {
        self.conns.lock().get(uid).cloned()
    }

    /// Remove and return the connection for `uid`.
    pub fn remove(&self, uid: &str) -> Option<Arc<Connection>> {
        self.conns.lock().remove(uid)
    }

    /// Remove the entry holding exactly this connection, whatever key it is
    /// currently under. Used on teardown, where the key may have been
    /// rekeyed concurrently.
    pub fn remove_entry_for(&self, conn: &Arc<Connection>) -> Option<String> {
        let mut conns = self.conns.lock();
        let key = conns
            .iter()
            .find(|(_, candidate)| Arc::ptr_eq(candidate, conn))
            .map(|(key, _)| key.clone())?;
        conns.remove(&key);
        Some(key)
    }

    /// The remote address registered for `uid`, for log lines.
    pub fn remote_addr(&self, uid: &str) -> Option<SocketAddr> {
        self.conns.lock().get(uid).map(|conn| conn.remote_addr())
    }

    /// `host:port` of `uid`'s socket, or `"unknown"`.
    pub fn describe(&self, uid: &str) -> String {
        match self.remote_addr(uid) {
            Some(addr) => addr.to_string(),
            None => "unknown".to_string(),
        }
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> Vec<(String, Arc<Connection>)> {
        self.conns
            .lock()
            .iter()
            .map(|(key, conn)| (key.clone(), Arc::clone(conn)))
            .collect()
    }

    /// Remove every entry, returning them for the caller to close.
    pub fn drain(&self) -> Vec<(String, Arc<Connection>)> {
        self.conns.lock().drain().collect()
    }

    /// Number of entries, ready or not.
    pub fn len(&self) -> usize {
        self.conns.lock().len()
    }

    /// True when no entry exists.
    pub fn is_empty(&self) -> bool {
        self.conns.lock().is_empty()
    }

    /// True while some live connection has not completed its handshake
    /// yet. Short-mode dialing waits these out instead of stacking a
    /// second dial behind one already in flight.
    pub fn has_pending(&self) -> bool {
        self.conns
            .lock()
            .values()
            .any(|conn| !conn.is_ready() && !conn.is_closed())
    }

    /// Number of connections whose handshake completed and whose tasks
    /// are alive.
    pub fn count_ready(&self) -> usize {
        self.conns
            .lock()
            .values()
            .filter(|conn| conn.is_ready())
            .count()
    }

    /// An arbitrary ready connection, or `None` while none exists.
    pub fn pick_ready(&self) -> Option<Arc<Connection>> {
        let conns = self.conns.lock();
        let ready: Vec<&Arc<Connection>> =
            conns.values().filter(|conn| conn.is_ready()).collect();
        ready
            .choose(&mut rand::thread_rng())
            .map(|conn| Arc::clone(conn))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
