//! Property-based tests for the connection pool.
//!
//! Properties tested:
//! 1. Uniqueness: after any sequence of insert/rekey/remove operations,
//!    no connection is reachable under two keys and every key resolves to
//!    exactly the connection a reference model predicts.
//! 2. Rekey atomicity: once a rekey lands, the old key is gone and the
//!    new key resolves, in the same step.
//! 3. Removal completeness: `remove` and `remove_entry_for` agree with
//!    the model on what they evicted, and `count_ready`/`len` never
//!    disagree with the surviving entries.

#[cfg(test)]
mod tests {
    use {
        duplex_net::{ConnPool, Connection},
        proptest::{collection::vec, prelude::*},
        std::{collections::HashMap, net::SocketAddr, sync::Arc},
    };

    /// Distinct connections available to a sequence.
    const CONNS: usize = 6;
    /// Rekey targets beyond the provisional addresses.
    const UIDS: &[&str] = &["Server", "alice", "bob", "carol"];

    /// Key universe: each connection's provisional `host:port`, plus a few
    /// advertised UIDs, so sequences collide on keys often.
    fn key(index: usize) -> String {
        if index < CONNS {
            addr(index).to_string()
        } else {
            UIDS[index - CONNS].to_string()
        }
    }

    fn key_count() -> usize {
        CONNS + UIDS.len()
    }

    fn addr(conn: usize) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, conn as u8 + 1], 9000 + conn as u16))
    }

    /// One step against the pool.
    #[derive(Debug, Clone)]
    enum PoolOp {
        /// Register connection `conn` under its provisional address, the
        /// way a fresh accept or dial does.
        Insert { conn: usize },
        /// Move whatever lives at one key to another, the way a completed
        /// handshake does.
        Rekey { old: usize, new: usize },
        /// Evict by key, the way a targeted close does.
        Remove { key: usize },
        /// Evict by identity, the way connection teardown does.
        RemoveEntryFor { conn: usize },
    }

    fn arb_op() -> impl Strategy<Value = PoolOp> {
        prop_oneof![
            (0..CONNS).prop_map(|conn| PoolOp::Insert { conn }),
            (0..key_count(), 0..key_count())
                .prop_map(|(old, new)| PoolOp::Rekey { old, new }),
            (0..key_count()).prop_map(|key| PoolOp::Remove { key }),
            (0..CONNS).prop_map(|conn| PoolOp::RemoveEntryFor { conn }),
        ]
    }

    /// Assert the pool and the reference model describe the same mapping,
    /// and that no connection appears under two keys.
    fn assert_matches_model(
        pool: &ConnPool,
        model: &HashMap<String, usize>,
        conns: &[Arc<Connection>],
    ) {
        assert_eq!(pool.len(), model.len());
        for (key, conn) in model {
            let found = pool.get(key).unwrap_or_else(|| {
                panic!("model expects {key} to resolve, pool says no")
            });
            assert!(Arc::ptr_eq(&found, &conns[*conn]), "wrong connection under {key}");
        }

        let mut pointers: Vec<*const Connection> = pool
            .entries()
            .iter()
            .map(|(_, conn)| Arc::as_ptr(conn))
            .collect();
        pointers.sort();
        pointers.dedup();
        assert_eq!(
            pointers.len(),
            pool.len(),
            "a connection is reachable under two keys"
        );

        // Detached connections never handshake, so none count as ready.
        assert_eq!(pool.count_ready(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_pool_matches_model_under_any_op_sequence(
            ops in vec(arb_op(), 1..40),
        ) {
            let conns: Vec<Arc<Connection>> =
                (0..CONNS).map(|conn| Connection::detached(addr(conn))).collect();
            let pool = ConnPool::new();
            let mut model: HashMap<String, usize> = HashMap::new();

            for op in ops {
                match op {
                    PoolOp::Insert { conn } => {
                        // A live connection is registered at most once; a
                        // second registration only happens after the first
                        // entry is gone, as with a reconnect.
                        if model.values().any(|present| *present == conn) {
                            continue;
                        }
                        let provisional = addr(conn).to_string();
                        let displaced = pool.insert(&provisional, Arc::clone(&conns[conn]));
                        let expected = model.insert(provisional, conn);
                        prop_assert_eq!(
                            displaced.map(|d| Arc::as_ptr(&d)),
                            expected.map(|e| Arc::as_ptr(&conns[e]))
                        );
                    }
                    PoolOp::Rekey { old, new } => {
                        let (old, new) = (key(old), key(new));
                        let displaced = pool.rekey(&old, &new);
                        let expected = match model.remove(&old) {
                            Some(conn) => model.insert(new.clone(), conn),
                            None => None,
                        };
                        prop_assert_eq!(
                            displaced.map(|d| Arc::as_ptr(&d)),
                            expected.map(|e| Arc::as_ptr(&conns[e]))
                        );
                        // Atomic from the outside: the move either
                        // happened entirely or not at all.
                        if old != new {
                            prop_assert_eq!(
                                pool.get(&old).is_some(),
                                model.contains_key(&old)
                            );
                        }
                        prop_assert_eq!(pool.get(&new).is_some(), model.contains_key(&new));
                    }
                    PoolOp::Remove { key: index } => {
                        let key = key(index);
                        let removed = pool.remove(&key);
                        let expected = model.remove(&key);
                        prop_assert_eq!(
                            removed.map(|r| Arc::as_ptr(&r)),
                            expected.map(|e| Arc::as_ptr(&conns[e]))
                        );
                    }
                    PoolOp::RemoveEntryFor { conn } => {
                        let evicted = pool.remove_entry_for(&conns[conn]);
                        let expected = model
                            .iter()
                            .find(|(_, present)| **present == conn)
                            .map(|(key, _)| key.clone());
                        if let Some(key) = &expected {
                            model.remove(key);
                        }
                        prop_assert_eq!(evicted, expected);
                    }
                }

                assert_matches_model(&pool, &model, &conns);
            }
        }

        #[test]
        fn prop_rekey_chain_keeps_one_entry(
            hops in vec(0..key_count(), 1..12),
        ) {
            // A single connection dragged through an arbitrary chain of
            // rekeys is always reachable under exactly the last key.
            let conn = Connection::detached(addr(0));
            let pool = ConnPool::new();
            let start = addr(0).to_string();
            pool.insert(&start, Arc::clone(&conn));

            let mut current = start;
            for hop in hops {
                let next = key(hop);
                pool.rekey(&current, &next);
                current = next;
                prop_assert_eq!(pool.len(), 1);
                let found = pool.get(&current).expect("entry must survive the hop");
                prop_assert!(Arc::ptr_eq(&found, &conn));
            }
        }
    }
}
