// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! End-to-end scenarios 1 and 2 from the testable-properties list, plus a
//! fan-out P3 (FIFO) check: replies dispatch to the i-th enqueued handler
//! regardless of how many commands were pipelined ahead of it.

use bytes::BytesMut;
use resp_client::codec::encode_command;
use resp_client::logging::NullLogSink;
use resp_client::reply::{Command, Reply};
use resp_client::request_client::{RequestClient, RequestClientOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn encoded(command: &Command) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_command(command, &mut buf);
    buf.to_vec()
}

async fn read_exact_len(socket: &mut tokio::net::TcpStream, len: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    while buf.len() < len {
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.unwrap();
        assert_ne!(n, 0, "peer closed before sending the expected bytes");
        buf.extend_from_slice(&chunk[..n]);
    }
    buf
}

async fn connect_client(host: &str, port: u16) -> RequestClient {
    let client = RequestClient::new(
        RequestClientOptions {
            host: host.to_string(),
            port,
            connect_timeout: Duration::from_secs(1),
            ..RequestClientOptions::default()
        },
        Arc::new(NullLogSink),
    );
    client.connect().await.unwrap();
    client
}

/// Scenario 1: SET then GET, a single sync_commit.
#[tokio::test]
async fn scenario_basic_get_after_set() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let set_cmd = Command::from_args(["SET", "k", "v1"]);
    let get_cmd = Command::from_args(["GET", "k"]);
    let expected_request = [encoded(&set_cmd), encoded(&get_cmd)].concat();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_exact_len(&mut socket, expected_request.len()).await;
        socket
            .write_all(b"+OK\r\n$2\r\nv1\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    let client = connect_client(&addr.ip().to_string(), addr.port()).await;
    let replies: Arc<Mutex<Vec<Reply>>> = Arc::new(Mutex::new(Vec::new()));

    let r = replies.clone();
    client.send(set_cmd, move |reply| r.lock().unwrap().push(reply));
    let r = replies.clone();
    client.send(get_cmd, move |reply| r.lock().unwrap().push(reply));
    client.sync_commit(Some(Duration::from_secs(2))).await.unwrap();

    let got = replies.lock().unwrap().clone();
    assert_eq!(
        got,
        vec![Reply::ok(), Reply::BulkString(b"v1".to_vec())]
    );
    server.await.unwrap();
}

/// Scenario 2: three pipelined INCRs under one sync_commit, then a fourth
/// under a separate sync_commit -- P3 (FIFO) across two flush boundaries.
#[tokio::test]
async fn scenario_pipelining_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let incr_cmd = || Command::from_args(["INCR", "ctr"]);
    let first_batch_len = encoded(&incr_cmd()).len() * 3;
    let second_batch_len = encoded(&incr_cmd()).len();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_exact_len(&mut socket, first_batch_len).await;
        socket.write_all(b":1\r\n:2\r\n:3\r\n").await.unwrap();
        let _ = read_exact_len(&mut socket, second_batch_len).await;
        socket.write_all(b":4\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    let client = connect_client(&addr.ip().to_string(), addr.port()).await;
    let replies: Arc<Mutex<Vec<Reply>>> = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let r = replies.clone();
        client.send(incr_cmd(), move |reply| r.lock().unwrap().push(reply));
    }
    client.sync_commit(Some(Duration::from_secs(2))).await.unwrap();

    let r = replies.clone();
    client.send(incr_cmd(), move |reply| r.lock().unwrap().push(reply));
    client.sync_commit(Some(Duration::from_secs(2))).await.unwrap();

    let got = replies.lock().unwrap().clone();
    assert_eq!(
        got,
        vec![
            Reply::Integer(1),
            Reply::Integer(2),
            Reply::Integer(3),
            Reply::Integer(4),
        ]
    );
    server.await.unwrap();
}

/// P3: for N pipelined commands, the i-th enqueued handler gets the i-th
/// reply, regardless of N.
#[tokio::test]
async fn fifo_holds_for_a_larger_pipeline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    const N: usize = 25;
    let ping = || Command::from_args(["PING"]);
    let expected_len = encoded(&ping()).len() * N;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_exact_len(&mut socket, expected_len).await;
        let mut response = Vec::new();
        for i in 0..N {
            response.extend_from_slice(format!(":{i}\r\n").as_bytes());
        }
        socket.write_all(&response).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    let client = connect_client(&addr.ip().to_string(), addr.port()).await;
    let replies: Arc<Mutex<Vec<Reply>>> = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..N {
        let r = replies.clone();
        client.send(ping(), move |reply| r.lock().unwrap().push(reply));
    }
    client.sync_commit(Some(Duration::from_secs(2))).await.unwrap();

    let got = replies.lock().unwrap().clone();
    let expected: Vec<Reply> = (0..N as i64).map(Reply::Integer).collect();
    assert_eq!(got, expected);
    server.await.unwrap();
}
