// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! End-to-end scenarios 3 and 4: channel fan-out and pattern fan-out,
//! against a scripted fake server that acknowledges a (p)subscribe and
//! then pushes messages the way a real server would after another client's
//! `PUBLISH`. Also covers P5: the active subscription set survives a
//! disconnect/reconnect cycle.

use resp_client::logging::NullLogSink;
use resp_client::subscriber_client::{SubscriberClient, SubscriberClientOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

async fn connect_subscriber(host: &str, port: u16) -> SubscriberClient {
    let client = SubscriberClient::new(
        SubscriberClientOptions {
            host: host.to_string(),
            port,
            connect_timeout: Duration::from_secs(1),
            ..SubscriberClientOptions::default()
        },
        Arc::new(NullLogSink),
    );
    client.connect().await.unwrap();
    client
}

async fn read_until_contains(socket: &mut tokio::net::TcpStream, needle: &[u8]) {
    let mut buf = Vec::new();
    loop {
        if buf.windows(needle.len()).any(|w| w == needle) {
            return;
        }
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.unwrap();
        assert_ne!(n, 0, "peer closed before sending the expected bytes");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Scenario 3: subscribe to "ch", wait for the acknowledgement, then
/// receive two published messages in order.
#[tokio::test]
async fn scenario_pubsub_fan_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_until_contains(&mut socket, b"SUBSCRIBE").await;
        socket
            .write_all(b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n")
            .await
            .unwrap();
        socket
            .write_all(b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$5\r\nhello\r\n")
            .await
            .unwrap();
        socket
            .write_all(b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$5\r\nworld\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
    });

    let client = connect_subscriber(&addr.ip().to_string(), addr.port()).await;

    let (ack_tx, ack_rx) = oneshot::channel();
    let ack_tx = Arc::new(Mutex::new(Some(ack_tx)));
    let messages: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));

    let messages_for_handler = messages.clone();
    client.subscribe_with_ack(
        "ch",
        Arc::new(move |channel: &[u8], payload: &[u8]| {
            messages_for_handler
                .lock()
                .unwrap()
                .push((channel.to_vec(), payload.to_vec()));
        }),
        Some(Arc::new(move |count: i64| {
            if let Some(tx) = ack_tx.lock().unwrap().take() {
                let _ = tx.send(count);
            }
        })),
    );
    client.commit().unwrap();

    let count = ack_rx.await.unwrap();
    assert_eq!(count, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let got = messages.lock().unwrap().clone();
    assert_eq!(
        got,
        vec![
            (b"ch".to_vec(), b"hello".to_vec()),
            (b"ch".to_vec(), b"world".to_vec()),
        ]
    );
    server.await.unwrap();
}

/// Scenario 4: psubscribe to "ch.*" sees messages for "ch.a" and "ch.b" but
/// never for an unmatched pattern.
#[tokio::test]
async fn scenario_pattern_subscribe_fan_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_until_contains(&mut socket, b"PSUBSCRIBE").await;
        socket
            .write_all(b"*3\r\n$10\r\npsubscribe\r\n$4\r\nch.*\r\n:1\r\n")
            .await
            .unwrap();
        socket
            .write_all(b"*4\r\n$8\r\npmessage\r\n$4\r\nch.*\r\n$4\r\nch.a\r\n$1\r\n1\r\n")
            .await
            .unwrap();
        socket
            .write_all(b"*4\r\n$8\r\npmessage\r\n$4\r\nch.*\r\n$4\r\nch.b\r\n$1\r\n2\r\n")
            .await
            .unwrap();
        // A pmessage for an unrelated, never-subscribed pattern: must not
        // be dispatched to our handler.
        socket
            .write_all(b"*4\r\n$8\r\npmessage\r\n$9\r\nunrelated\r\n$5\r\nother\r\n$1\r\n3\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
    });

    let client = connect_subscriber(&addr.ip().to_string(), addr.port()).await;
    let messages: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let messages_for_handler = messages.clone();
    client.psubscribe(
        "ch.*",
        Arc::new(move |_pattern: &[u8], channel: &[u8], payload: &[u8]| {
            messages_for_handler
                .lock()
                .unwrap()
                .push((channel.to_vec(), payload.to_vec()));
        }),
    );
    client.commit().unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let got = messages.lock().unwrap().clone();
    assert_eq!(
        got,
        vec![
            (b"ch.a".to_vec(), b"1".to_vec()),
            (b"ch.b".to_vec(), b"2".to_vec()),
        ]
    );
    server.await.unwrap();
}

/// P5: the active subscription set survives a disconnect/reconnect cycle.
/// The original handler, registered before the drop, must still be the one
/// invoked for a message published after the reconnect.
#[tokio::test]
async fn scenario_subscription_survives_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First connection: acknowledge the subscribe, then drop without
        // ever publishing anything.
        let (mut first, _) = listener.accept().await.unwrap();
        read_until_contains(&mut first, b"SUBSCRIBE").await;
        first
            .write_all(b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n")
            .await
            .unwrap();
        drop(first);

        // Second connection: the reconnect must replay SUBSCRIBE for the
        // same channel before anything is published.
        let (mut second, _) = listener.accept().await.unwrap();
        read_until_contains(&mut second, b"SUBSCRIBE").await;
        second
            .write_all(b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n")
            .await
            .unwrap();
        second
            .write_all(b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$11\r\nafter-recon\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
    });

    let client = SubscriberClient::new(
        SubscriberClientOptions {
            host: addr.ip().to_string(),
            port: addr.port(),
            connect_timeout: Duration::from_secs(1),
            max_reconnects: 3,
            reconnect_interval: Duration::ZERO,
            ..SubscriberClientOptions::default()
        },
        Arc::new(NullLogSink),
    );
    client.connect().await.unwrap();

    let messages: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let messages_for_handler = messages.clone();
    client.subscribe(
        "ch",
        Arc::new(move |channel: &[u8], payload: &[u8]| {
            messages_for_handler
                .lock()
                .unwrap()
                .push((channel.to_vec(), payload.to_vec()));
        }),
    );
    client.commit().unwrap();

    // Give the first connection time to ack, then drop, then reconnect and
    // ack+publish again.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let got = messages.lock().unwrap().clone();
    assert_eq!(got, vec![(b"ch".to_vec(), b"after-recon".to_vec())]);
    server.await.unwrap();
}
