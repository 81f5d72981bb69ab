//! E2E: request/reply semantics over live sockets.
//!
//! Covers the echo round trip, the `ILLEGAL` reply for an unregistered
//! operation, the `FAILURE` fall-back when a handler's reply cannot be
//! routed, and short-mode connection closure after a silent handler.

use {
    duplex_e2e_tests::helpers::*,
    duplex_net::{Envelope, NetConfig, NodeBuilder, FAILURE, ILLEGAL, SUCCESS},
    std::time::Duration,
};

// ─────────────────────────────────────────────────────────────────────────────
// Echo: body, routing fields, and status all come back intact
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_echo_round_trip() {
    init_logging();
    let (server, port) = echo_server().await;

    let (collect, mut replies) = collector();
    let client = NodeBuilder::new()
        .config(NetConfig::dev_default())
        .uid("client-1")
        .handler("echo", collect)
        .client("127.0.0.1", port)
        .await
        .unwrap();

    client.request(b"hi".to_vec(), "echo", None).await.unwrap();

    let reply = recv_one(&mut replies).await;
    assert_eq!(reply.operation, "echo");
    assert_eq!(reply.from, "Server");
    assert_eq!(reply.to, "client-1");
    assert_eq!(reply.status, SUCCESS);
    assert_eq!(reply.body, b"hi");

    client.close();
    server.close();
}

// ─────────────────────────────────────────────────────────────────────────────
// Unknown operation: exactly one ILLEGAL reply with a human-readable body
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_operation_returns_illegal() {
    init_logging();
    let (server, port) = echo_server().await;

    let (collect, mut replies) = collector();
    let client = NodeBuilder::new()
        .config(NetConfig::dev_default())
        .uid("client-2")
        .handler("nope", collect)
        .client("127.0.0.1", port)
        .await
        .unwrap();

    client.request(Vec::new(), "nope", None).await.unwrap();

    let reply = recv_one(&mut replies).await;
    assert_eq!(reply.status, ILLEGAL);
    assert_eq!(reply.operation, "nope");
    assert_eq!(reply.to, "client-2");
    assert!(!reply.body.is_empty(), "the body must name the problem");

    // Exactly one reply: nothing else shows up afterwards.
    let extra = tokio::time::timeout(Duration::from_millis(500), replies.recv()).await;
    assert!(extra.is_err(), "unexpected second reply: {extra:?}");

    client.close();
    server.close();
}

// ─────────────────────────────────────────────────────────────────────────────
// Unroutable reply: handler targets a peer that is not in the pool
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unroutable_reply_fails_back_to_requester() {
    init_logging();
    let server = NodeBuilder::new()
        .config(NetConfig::dev_default())
        .handler("relay", |_req: Envelope| {
            Some(Envelope::reply(b"forwarded".to_vec()).with_to("ghost"))
        })
        .server(0)
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();

    let (collect, mut replies) = collector();
    let client = NodeBuilder::new()
        .config(NetConfig::dev_default())
        .uid("client-3")
        .handler("relay", collect)
        .client("127.0.0.1", port)
        .await
        .unwrap();

    client.request(b"x".to_vec(), "relay", None).await.unwrap();

    let reply = recv_one(&mut replies).await;
    assert_eq!(reply.status, FAILURE);
    assert_eq!(reply.operation, "relay");
    assert_eq!(reply.from, "Server");

    client.close();
    server.close();
}

// ─────────────────────────────────────────────────────────────────────────────
// Short mode: a silent handler closes the connection behind the reply
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_short_mode_closes_after_silent_handler() {
    init_logging();
    let (server, port) = echo_server().await;

    let (collect, mut replies) = collector();
    let client = NodeBuilder::new()
        .config(NetConfig::dev_default())
        .uid("client-4")
        .handler("echo", collect)
        .client_short("127.0.0.1", port)
        .await
        .unwrap();

    // No background dialing in short mode: the request itself dials.
    assert_eq!(client.count_nodes(), 0);
    client.request(b"bye".to_vec(), "echo", None).await.unwrap();

    let reply = recv_one(&mut replies).await;
    assert_eq!(reply.body, b"bye");

    // The silent collector ran over a short-lived connection, so the
    // dispatcher drops it from the pool.
    assert!(
        wait_until(Duration::from_secs(5), || client.count_nodes() == 0).await,
        "short connection must leave the pool"
    );

    client.close();
    server.close();
}

// ─────────────────────────────────────────────────────────────────────────────
// Short mode, directed: a request aimed at a UID still dials lazily
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_short_mode_directed_request_dials() {
    init_logging();
    let (server, port) = echo_server().await;

    let (collect, mut replies) = collector();
    let client = NodeBuilder::new()
        .config(NetConfig::dev_default())
        .uid("client-7")
        .handler("echo", collect)
        .client_short("127.0.0.1", port)
        .await
        .unwrap();

    // Directed at the server's UID with an empty pool: the request itself
    // must dial and wait out the handshake.
    client
        .request(b"one".to_vec(), "echo", Some("Server"))
        .await
        .unwrap();
    let reply = recv_one(&mut replies).await;
    assert_eq!(reply.body, b"one");
    assert_eq!(reply.to, "client-7");

    // The silent collector closed the short connection behind the reply.
    assert!(
        wait_until(Duration::from_secs(5), || client.count_nodes() == 0).await,
        "short connection must leave the pool"
    );

    // A second directed request finds no connection for the target and
    // dials again from scratch.
    client
        .request(b"two".to_vec(), "echo", Some("Server"))
        .await
        .unwrap();
    let reply = recv_one(&mut replies).await;
    assert_eq!(reply.body, b"two");

    client.close();
    server.close();
}

// ─────────────────────────────────────────────────────────────────────────────
// Directed request: an explicit target UID is honoured
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_request_with_explicit_target() {
    init_logging();
    let (server, port) = echo_server().await;

    let (collect, mut replies) = collector();
    let client = NodeBuilder::new()
        .config(NetConfig::dev_default())
        .uid("client-5")
        .handler("echo", collect)
        .client("127.0.0.1", port)
        .await
        .unwrap();

    client
        .request(b"direct".to_vec(), "echo", Some("Server"))
        .await
        .unwrap();

    let reply = recv_one(&mut replies).await;
    assert_eq!(reply.body, b"direct");

    client.close();
    server.close();
}

// ─────────────────────────────────────────────────────────────────────────────
// Server-initiated request: symmetry of the two roles
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_can_initiate_requests() {
    init_logging();
    let (collect, mut inbox) = collector();
    let server = NodeBuilder::new()
        .config(NetConfig::dev_default())
        .handler("notify-ack", collect)
        .server(0)
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();

    let client = NodeBuilder::new()
        .config(NetConfig::dev_default())
        .uid("client-6")
        .handler("notify", |req: Envelope| {
            Some(Envelope::reply(req.body).with_operation("notify-ack"))
        })
        .client("127.0.0.1", port)
        .await
        .unwrap();

    // Wait for the handshake, then push from the server side.
    assert!(wait_until(Duration::from_secs(5), || server.count_nodes() == 1).await);
    server
        .request(b"server says hi".to_vec(), "notify", Some("client-6"))
        .await
        .unwrap();

    let ack = recv_one(&mut inbox).await;
    assert_eq!(ack.operation, "notify-ack");
    assert_eq!(ack.from, "client-6");
    assert_eq!(ack.body, b"server says hi");

    client.close();
    server.close();
}
