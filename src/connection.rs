// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! Connection (§4.C): couples the wire codec to a duplex transport and
//! drives the single background read loop that every reply and disconnect
//! notification passes through.
//!
//! Grounded on the mpsc-driven background task in
//! `aio/multiplexed_connection.rs`'s `Pipeline`, simplified to match this
//! crate's callback-based dispatch rather than a `Stream`/`Sink` combinator
//! pipeline: there is exactly one registered reply handler and one
//! disconnect handler at a time, swapped out wholesale by the owning client
//! on every (re)connect.

use crate::codec::{RespDecoder, DEFAULT_MAX_DEPTH};
use crate::error::RespError;
use crate::reply::{Command, Reply};
use crate::transport::{connect_duplex, BoxedReader, BoxedWriter};
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type ReplyHandler = Arc<dyn Fn(Reply) + Send + Sync>;
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// A live duplex socket plus the codec state needed to turn its bytes into
/// [`Reply`] values, and back.
///
/// `send` only appends to an outbound buffer; nothing reaches the socket
/// until `commit` moves that buffer to the writer task in one hand-off, so a
/// caller can build up several commands before paying for a syscall (§4.C,
/// §5 "single outbound buffer").
pub struct Connection {
    outbound: Mutex<BytesMut>,
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    on_reply: Mutex<Option<ReplyHandler>>,
    on_disconnect: Mutex<Option<DisconnectHandler>>,
    disconnected: Arc<AtomicBool>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connects to `(host, port)` and starts the reader/writer tasks. The
    /// connection has no reply or disconnect handler registered yet --
    /// callers install those with [`Connection::set_on_reply`] and
    /// [`Connection::set_on_disconnect`] before issuing any command.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Arc<Connection>, RespError> {
        let (reader, writer) = connect_duplex(host, port, connect_timeout).await?;
        Ok(Connection::from_halves(reader, writer))
    }

    fn from_halves(reader: BoxedReader, writer: BoxedWriter) -> Arc<Connection> {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let disconnected = Arc::new(AtomicBool::new(false));

        let connection = Arc::new(Connection {
            outbound: Mutex::new(BytesMut::new()),
            writer_tx,
            on_reply: Mutex::new(None),
            on_disconnect: Mutex::new(None),
            disconnected: disconnected.clone(),
            reader_task: Mutex::new(None),
            writer_task: Mutex::new(None),
        });

        let reader_task = tokio::spawn(run_reader(reader, connection.clone()));
        let writer_task = tokio::spawn(run_writer(writer, writer_rx, connection.clone()));
        *connection.reader_task.lock().unwrap() = Some(reader_task);
        *connection.writer_task.lock().unwrap() = Some(writer_task);
        connection
    }

    pub fn set_on_reply(&self, handler: impl Fn(Reply) + Send + Sync + 'static) {
        *self.on_reply.lock().unwrap() = Some(Arc::new(handler));
    }

    pub fn set_on_disconnect(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.on_disconnect.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Appends the encoding of `command` to the outbound buffer. No bytes
    /// reach the socket until the next [`Connection::commit`].
    pub fn send(&self, command: &Command) {
        let mut buf = self.outbound.lock().unwrap();
        crate::codec::encode_command(command, &mut buf);
    }

    /// Moves the outbound buffer out and submits it to the writer task as a
    /// single write. On failure the buffer is not retried or restored: the
    /// bytes are gone and the error is the caller's to handle (§4.C).
    pub fn commit(&self) -> Result<(), RespError> {
        let bytes = {
            let mut buf = self.outbound.lock().unwrap();
            if buf.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buf).to_vec()
        };
        self.writer_tx
            .send(bytes)
            .map_err(|_| RespError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection writer has shut down",
            )))
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Tears the connection down, flushing any outstanding write first when
    /// `wait_for_drain` is set. Idempotent.
    pub async fn disconnect(&self, wait_for_drain: bool) {
        if !wait_for_drain {
            if let Some(handle) = self.writer_task.lock().unwrap().take() {
                handle.abort();
            }
        }
        if let Some(handle) = self.reader_task.lock().unwrap().take() {
            handle.abort();
        }
        fire_disconnect(&self.disconnected, &self.on_disconnect);
    }
}

fn fire_disconnect(disconnected: &AtomicBool, on_disconnect: &Mutex<Option<DisconnectHandler>>) {
    if disconnected
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        if let Some(handler) = on_disconnect.lock().unwrap().clone() {
            handler();
        }
    }
}

async fn run_reader(mut reader: BoxedReader, connection: Arc<Connection>) {
    let mut decoder = RespDecoder::with_max_depth(DEFAULT_MAX_DEPTH);
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => {
                fire_disconnect(&connection.disconnected, &connection.on_disconnect);
                return;
            }
            Ok(n) => n,
        };
        let replies = match decoder.feed(&chunk[..n]) {
            Ok(replies) => replies,
            Err(_) => {
                // A malformed stream is fatal to this connection: report it
                // the same way a transport failure is reported, the owning
                // client decides whether to reconnect.
                fire_disconnect(&connection.disconnected, &connection.on_disconnect);
                return;
            }
        };
        let handler = connection.on_reply.lock().unwrap().clone();
        if let Some(handler) = handler {
            for reply in replies {
                handler(reply);
            }
        }
    }
}

async fn run_writer(
    mut writer: BoxedWriter,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    connection: Arc<Connection>,
) {
    while let Some(bytes) = rx.recv().await {
        if writer.write_all(&bytes).await.is_err() {
            fire_disconnect(&connection.disconnected, &connection.on_disconnect);
            return;
        }
    }
}
