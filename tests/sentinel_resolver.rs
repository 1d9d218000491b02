// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! Integration coverage for §4.D: a [`RequestClient`] configured with a
//! sentinel service name consults the sentinel pool for the primary's
//! address instead of dialing a fixed host/port, and falls through a dead
//! sentinel to the next one in the pool.

use resp_client::logging::NullLogSink;
use resp_client::request_client::{RequestClient, RequestClientOptions};
use resp_client::reply::{Command, Reply};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A sentinel that answers `SENTINEL get-master-addr-by-name` with a fixed
/// primary address, once.
async fn fake_sentinel(primary_host: &str, primary_port: u16) -> (tokio::task::JoinHandle<()>, String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "*2\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
        primary_host.len(),
        primary_host,
        primary_port.to_string().len(),
        primary_port
    );
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 512];
        let _ = socket.read(&mut buf).await.unwrap();
        socket.write_all(response.as_bytes()).await.unwrap();
    });
    (handle, addr.ip().to_string(), addr.port())
}

/// A primary that answers exactly one `PING` with `PONG`.
async fn fake_primary() -> (tokio::task::JoinHandle<()>, String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 512];
        let _ = socket.read(&mut buf).await.unwrap();
        socket.write_all(b"+PONG\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    });
    (handle, addr.ip().to_string(), addr.port())
}

#[tokio::test]
async fn request_client_resolves_primary_through_sentinel() {
    let (primary_task, primary_host, primary_port) = fake_primary().await;
    let (sentinel_task, sentinel_host, sentinel_port) =
        fake_sentinel(&primary_host, primary_port).await;

    let client = RequestClient::new(
        RequestClientOptions {
            sentinel_service_name: Some("mymaster".to_string()),
            connect_timeout: Duration::from_secs(1),
            ..RequestClientOptions::default()
        },
        Arc::new(NullLogSink),
    );
    client.add_sentinel(sentinel_host, sentinel_port, Duration::from_millis(500));
    client.connect().await.unwrap();

    let reply = resp_client::future::send(&client, Command::from_args(["PING"])).await;
    assert_eq!(reply, Reply::SimpleString(b"PONG".to_vec()));

    sentinel_task.await.unwrap();
    primary_task.await.unwrap();
}

#[tokio::test]
async fn request_client_falls_through_a_dead_sentinel() {
    let (primary_task, primary_host, primary_port) = fake_primary().await;
    let (sentinel_task, sentinel_host, sentinel_port) =
        fake_sentinel(&primary_host, primary_port).await;

    // A port nothing listens on: the resolver must skip it and try the
    // live sentinel next, in insertion order.
    let dead_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = dead_listener.local_addr().unwrap().port();
    drop(dead_listener);

    let client = RequestClient::new(
        RequestClientOptions {
            sentinel_service_name: Some("mymaster".to_string()),
            connect_timeout: Duration::from_secs(1),
            ..RequestClientOptions::default()
        },
        Arc::new(NullLogSink),
    );
    client.add_sentinel("127.0.0.1", dead_port, Duration::from_millis(200));
    client.add_sentinel(sentinel_host, sentinel_port, Duration::from_millis(500));
    client.connect().await.unwrap();

    let reply = resp_client::future::send(&client, Command::from_args(["PING"])).await;
    assert_eq!(reply, Reply::SimpleString(b"PONG".to_vec()));

    sentinel_task.await.unwrap();
    primary_task.await.unwrap();
}
