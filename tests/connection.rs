//! Connection manager tests against a local WebSocket server.

#![cfg(feature = "mock")]

mod common;

use chrono::Utc;
use common::{Frame, Reply, TestServer};
use futures::StreamExt;
use sockql::connection::{ConnectionManager, Inbound};
use sockql::{CloseReason, ConnectionState, RequestSigner, SignedHeader, TemporaryCredentials};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use url::Url;

const DEADLINE: Duration = Duration::from_secs(10);

fn signed(server: &TestServer) -> SignedHeader {
    let creds = TemporaryCredentials::new("ASIATESTKEY", "testSecret", "testSessionToken");
    let url = Url::parse(&server.url).unwrap();
    RequestSigner::new("us-east-1", "execute-api")
        .sign(&creds, &url, "GET", Utc::now())
        .unwrap()
}

fn raw(text: &str) -> Frame {
    Frame::Raw(text.to_string())
}

#[tokio::test]
async fn test_connect_send_receive() {
    common::init_tracing();
    let server = TestServer::start().await;
    server.reply(Reply::Frames(vec![raw("first"), raw("second")]));

    let manager = ConnectionManager::new(Duration::from_secs(60), 16);
    manager.connect(signed(&server)).await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Open);

    manager.send(r#"{"requestId":"r1"}"#.to_string()).await.unwrap();
    assert_eq!(timeout(DEADLINE, manager.recv()).await.unwrap(), Inbound::Message(b"first".to_vec()));
    assert_eq!(timeout(DEADLINE, manager.recv()).await.unwrap(), Inbound::Message(b"second".to_vec()));

    let stats = manager.stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.received, 2);
    assert_eq!(server.requests()[0]["requestId"], "r1");

    assert!(manager.close().await);
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert_eq!(manager.close_reason(), Some(CloseReason::Local));
    assert!(!manager.close().await);
    assert_eq!(manager.stats().closes, 1);
}

#[tokio::test]
async fn test_connect_is_idempotent_while_open() {
    let server = TestServer::start().await;
    let manager = ConnectionManager::new(Duration::from_secs(60), 16);

    manager.connect(signed(&server)).await.unwrap();
    manager.connect(signed(&server)).await.unwrap();

    assert_eq!(manager.stats().connects, 1);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_concurrent_connects_dial_once() {
    let server = TestServer::start().await;
    let manager = ConnectionManager::new(Duration::from_secs(60), 16);

    let (a, b) = tokio::join!(
        manager.connect(signed(&server)),
        manager.connect(signed(&server))
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(manager.stats().connects, 1);
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_remote_close_is_reported() {
    let server = TestServer::start().await;
    server.reply(Reply::FramesThenClose(vec![raw("bye")]));

    let manager = ConnectionManager::new(Duration::from_secs(60), 16);
    manager.connect(signed(&server)).await.unwrap();
    manager.send("ping".to_string()).await.unwrap();

    assert_eq!(timeout(DEADLINE, manager.recv()).await.unwrap(), Inbound::Message(b"bye".to_vec()));
    assert_eq!(
        timeout(DEADLINE, manager.recv()).await.unwrap(),
        Inbound::Closed(CloseReason::Remote)
    );
    assert!(!manager.is_open());
    assert!(matches!(
        manager.send("again".to_string()).await,
        Err(sockql::SockqlError::NotConnected)
    ));
}

#[tokio::test]
async fn test_receive_loop_ends_with_socket() {
    let server = TestServer::start().await;
    server.reply(Reply::FramesThenClose(vec![raw("a"), raw("b"), raw("c")]));

    let manager = ConnectionManager::new(Duration::from_secs(60), 16);
    manager.connect(signed(&server)).await.unwrap();
    manager.send("go".to_string()).await.unwrap();

    let frames: Vec<Vec<u8>> = timeout(DEADLINE, manager.receive_loop(CancellationToken::new()).collect())
        .await
        .unwrap();
    assert_eq!(frames, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
}

#[tokio::test]
async fn test_receive_loop_stops_on_token() {
    let server = TestServer::start().await;
    let manager = ConnectionManager::new(Duration::from_secs(60), 16);
    manager.connect(signed(&server)).await.unwrap();

    let stop = CancellationToken::new();
    stop.cancel();
    let frames: Vec<Vec<u8>> = timeout(DEADLINE, manager.receive_loop(stop).collect())
        .await
        .unwrap();
    assert!(frames.is_empty());
    assert!(manager.is_open());
}

#[tokio::test]
async fn test_traffic_resets_idle_window() {
    let server = TestServer::start().await;
    let manager = ConnectionManager::new(Duration::from_millis(300), 16);
    manager.connect(signed(&server)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    manager.send("keepalive".to_string()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(manager.is_open(), "closed before the reset window ran out");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!manager.is_open());
    assert_eq!(manager.close_reason(), Some(CloseReason::IdleTimeout));
    assert_eq!(
        timeout(DEADLINE, manager.recv()).await.unwrap(),
        Inbound::Closed(CloseReason::IdleTimeout)
    );
}

#[tokio::test]
async fn test_concurrent_interrupts_close_once() {
    let server = TestServer::start().await;
    let manager = ConnectionManager::new(Duration::from_secs(60), 16);
    manager.connect(signed(&server)).await.unwrap();

    let first = manager.interrupt_handle();
    let second = manager.interrupt_handle();
    let (a, b) = tokio::join!(first.interrupt(), second.interrupt());

    assert!(a ^ b, "exactly one interrupt closes the socket");
    assert_eq!(manager.stats().closes, 1);
    assert_eq!(manager.close_reason(), Some(CloseReason::Interrupted));
}

#[tokio::test]
async fn test_reconnect_after_close() {
    let server = TestServer::start().await;
    server.reply(Reply::Frames(vec![raw("stale")]));

    let manager = ConnectionManager::new(Duration::from_secs(60), 16);
    manager.connect(signed(&server)).await.unwrap();
    manager.send("one".to_string()).await.unwrap();
    // let the unread frame land in the old channel
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.close().await;

    server.reply(Reply::Frames(vec![raw("fresh")]));
    manager.connect(signed(&server)).await.unwrap();
    manager.send("two".to_string()).await.unwrap();

    assert_eq!(timeout(DEADLINE, manager.recv()).await.unwrap(), Inbound::Message(b"fresh".to_vec()));
    assert_eq!(manager.stats().connects, 2);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_handle_outliving_manager() {
    let manager = ConnectionManager::new(Duration::from_secs(60), 16);
    let handle = manager.interrupt_handle();
    drop(manager);
    assert!(!handle.interrupt().await);
}
