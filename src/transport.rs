// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! Transport adapter (§4.B): a single duplex byte stream with non-blocking
//! async read/write and scoped resource release on close.
//!
//! Two shapes of the same TCP primitive are exposed. [`Transport`] is a
//! half-duplex request/response handle used by short-lived callers that
//! never need to read and write at the same time -- the sentinel resolver
//! (§4.D) is the only consumer. [`connect_duplex`] hands back the socket
//! already split into independent read/write halves, which is what
//! [`crate::connection::Connection`] needs so its reader and writer tasks
//! can run concurrently without contending for `&mut` access to one object.

use crate::error::RespError;
use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

#[async_trait]
pub trait Transport: Send + 'static {
    /// Writes `bytes` in full.
    async fn send_async(&mut self, bytes: &[u8]) -> Result<(), RespError>;

    /// Reads at least one byte, appending to `into_buffer`, and returns the
    /// number of bytes read. `0` means the peer closed the connection.
    async fn receive_async(&mut self, into_buffer: &mut Vec<u8>) -> Result<usize, RespError>;

    /// Releases the socket. When `wait_for_drain` is set, blocks until any
    /// buffered write has been flushed first.
    async fn disconnect(&mut self, wait_for_drain: bool);
}

/// The only [`Transport`] this crate ships: a plain TCP socket, used
/// wherever a single caller owns both ends of the conversation (the
/// sentinel resolver's short-lived connections).
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connects to `(host, port)`. A zero `timeout` means "wait forever",
    /// matching the crate-wide convention that `0` means "no timeout" (§6).
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, RespError> {
        let stream = connect_tcp_stream(host, port, timeout).await?;
        Ok(TcpTransport { stream })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send_async(&mut self, bytes: &[u8]) -> Result<(), RespError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    async fn receive_async(&mut self, into_buffer: &mut Vec<u8>) -> Result<usize, RespError> {
        let mut chunk = [0u8; 16 * 1024];
        let n = self.stream.read(&mut chunk).await?;
        into_buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    async fn disconnect(&mut self, wait_for_drain: bool) {
        if wait_for_drain {
            let _ = self.stream.flush().await;
        }
        let _ = self.stream.shutdown().await;
    }
}

/// Connects to `(host, port)` and hands back independently ownable halves,
/// so a reader loop and a writer loop can run as separate tasks.
pub async fn connect_duplex(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(BoxedReader, BoxedWriter), RespError> {
    let stream = connect_tcp_stream(host, port, timeout).await?;
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    Ok((Box::pin(read_half), Box::pin(write_half)))
}

async fn connect_tcp_stream(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, RespError> {
    let connect = TcpStream::connect((host, port));
    let stream = if timeout.is_zero() {
        connect.await.map_err(classify_connect_error)?
    } else {
        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result.map_err(classify_connect_error)?,
            Err(_) => return Err(RespError::Timeout),
        }
    };
    stream.set_nodelay(true).ok();
    Ok(stream)
}

fn classify_connect_error(err: std::io::Error) -> RespError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused => RespError::RefusedByPeer,
        ErrorKind::TimedOut => RespError::Timeout,
        _ => RespError::Transport(err),
    }
}
