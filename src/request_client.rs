// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! Request client (§4.E): a pipelining RESP client with FIFO reply
//! dispatch and transparent reconnection.
//!
//! Grounded on `glide-core/src/client/reconnecting_connection.rs` and
//! `standalone_client.rs`: the same shape (a live connection behind a
//! swappable handle, a background task that re-establishes it with
//! backoff, AUTH/SELECT replayed before anything else), adapted from
//! GLIDE's protobuf request surface to this crate's plain
//! [`Command`]/callback surface.

use crate::connection::Connection;
use crate::error::RespError;
use crate::logging::{log_event, LogSink};
use crate::reply::{Command, Reply};
use crate::retry_strategies::RetryStrategy;
use crate::sentinel::SentinelResolver;
use futures_intrusive::sync::ManualResetEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ReplyHandler = Box<dyn FnOnce(Reply) + Send>;

struct PendingRequest {
    command: Command,
    handler: ReplyHandler,
}

/// Configuration that must survive every reconnect: reconnection policy,
/// remembered AUTH/SELECT state, and the address (fixed, or sentinel-discovered).
pub struct RequestClientOptions {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// `-1` retries forever; any other value bounds the attempt count.
    pub max_reconnects: i64,
    /// `0` disables the backoff sleep between attempts entirely.
    pub reconnect_interval: Duration,
    pub sentinel_service_name: Option<String>,
}

impl Default for RequestClientOptions {
    /// Matches §6's external defaults: no timeout, and no reconnection
    /// unless the caller opts in by raising `max_reconnects`.
    fn default() -> Self {
        RequestClientOptions {
            host: "127.0.0.1".to_string(),
            port: 6379,
            connect_timeout: Duration::ZERO,
            max_reconnects: 0,
            reconnect_interval: Duration::ZERO,
            sentinel_service_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

struct Inner {
    options: Mutex<RequestClientOptions>,
    connection: Mutex<Option<Arc<Connection>>>,
    pending: Mutex<VecDeque<PendingRequest>>,
    state: Mutex<ClientState>,
    connected_event: ManualResetEvent,
    drained_event: ManualResetEvent,
    sync_commit_busy: AtomicBool,
    reconnect_generation: AtomicI64,
    password: Mutex<Option<Vec<u8>>>,
    db_index: Mutex<Option<i64>>,
    sentinels: SentinelResolver,
    log: Arc<dyn LogSink>,
}

/// A pipelining client: [`RequestClient::send`] buffers a command behind a
/// FIFO handler, [`RequestClient::commit`] flushes everything buffered so
/// far in one write. Survives a dropped connection by reconnecting,
/// replaying AUTH/SELECT, then re-sending whatever was still pending.
#[derive(Clone)]
pub struct RequestClient {
    inner: Arc<Inner>,
}

impl RequestClient {
    pub fn new(options: RequestClientOptions, log: Arc<dyn LogSink>) -> RequestClient {
        let inner = Arc::new(Inner {
            options: Mutex::new(options),
            connection: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            state: Mutex::new(ClientState::Disconnected),
            connected_event: ManualResetEvent::new(false),
            drained_event: ManualResetEvent::new(true),
            sync_commit_busy: AtomicBool::new(false),
            reconnect_generation: AtomicI64::new(0),
            password: Mutex::new(None),
            db_index: Mutex::new(None),
            sentinels: SentinelResolver::new(log.clone()),
            log,
        });
        RequestClient { inner }
    }

    /// Establishes the first connection. Subsequent drops are handled by
    /// the reconnection loop; this method is only for the initial attempt
    /// and propagates its error instead of retrying.
    pub async fn connect(&self) -> Result<(), RespError> {
        *self.inner.state.lock().unwrap() = ClientState::Connecting;
        let (host, port) = self.inner.resolve_address().await?;
        let connection = self.inner.dial(&host, &port).await?;
        self.inner.install_connection(connection);
        self.inner.replay_auth_select_and_pending().await;
        *self.inner.state.lock().unwrap() = ClientState::Connected;
        self.inner.connected_event.set();
        Ok(())
    }

    /// Remembers `password` and issues `AUTH` immediately if connected; the
    /// same AUTH is replayed on every future reconnect.
    pub fn auth(&self, password: impl Into<Vec<u8>>) {
        let password = password.into();
        *self.inner.password.lock().unwrap() = Some(password.clone());
        if self.inner.is_connected() {
            self.send(Command::new().arg("AUTH").arg(password), |_| {});
            let _ = self.commit();
        }
    }

    /// Remembers `db_index` and issues `SELECT` immediately if connected;
    /// replayed on every future reconnect.
    pub fn select(&self, db_index: i64) {
        *self.inner.db_index.lock().unwrap() = Some(db_index);
        if self.inner.is_connected() {
            self.send(
                Command::new().arg("SELECT").arg(db_index.to_string()),
                |_| {},
            );
            let _ = self.commit();
        }
    }

    pub fn add_sentinel(&self, host: impl Into<String>, port: u16, connect_timeout: Duration) {
        self.inner
            .sentinels
            .add_sentinel(crate::sentinel::SentinelDefinition::new(
                host,
                port,
                connect_timeout,
            ));
    }

    pub fn clear_sentinels(&self) {
        self.inner.sentinels.clear_sentinels();
    }

    /// Buffers `command` behind `handler` in FIFO order. The command is
    /// also appended to the live connection's outbound buffer if one
    /// exists; if the client is mid-reconnect it stays queued only in the
    /// pending list, to be replayed once a connection comes back.
    pub fn send(&self, command: Command, handler: impl FnOnce(Reply) + Send + 'static) {
        self.inner.drained_event.reset();
        self.inner.pending.lock().unwrap().push_back(PendingRequest {
            command: command.clone(),
            handler: Box::new(handler),
        });
        if let Some(connection) = self.inner.connection.lock().unwrap().as_ref() {
            if *self.inner.state.lock().unwrap() == ClientState::Connected {
                connection.send(&command);
            }
        }
    }

    /// Flushes everything buffered on the live connection. A no-op while
    /// reconnecting or disconnected (§4.E): the commands stay queued and
    /// are committed as part of the replay once reconnection succeeds.
    pub fn commit(&self) -> Result<(), RespError> {
        let state = *self.inner.state.lock().unwrap();
        if state != ClientState::Connected {
            return Ok(());
        }
        if let Some(connection) = self.inner.connection.lock().unwrap().as_ref() {
            connection.commit()?;
        }
        Ok(())
    }

    /// Commits, then blocks until the FIFO drains (every pending reply has
    /// arrived) or `timeout` elapses. Not reentrant: calling this from
    /// inside a reply handler invoked by this same client is rejected
    /// rather than deadlocking.
    pub async fn sync_commit(&self, timeout: Option<Duration>) -> Result<(), RespError> {
        if self
            .inner
            .sync_commit_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RespError::configuration("sync_commit is not reentrant"));
        }
        let result = self.sync_commit_inner(timeout).await;
        self.inner.sync_commit_busy.store(false, Ordering::SeqCst);
        result
    }

    /// A timeout elapsing is not an error (§7 "User-visible failure":
    /// `sync_commit` returns cleanly on both full drain and timeout); only
    /// an immediate `commit` failure is propagated.
    async fn sync_commit_inner(&self, timeout: Option<Duration>) -> Result<(), RespError> {
        self.commit()?;
        let wait = self.inner.drained_event.wait();
        match timeout {
            None => wait.await,
            Some(duration) => {
                // Outstanding requests are left untouched either way; the
                // caller is simply handed back control.
                let _ = tokio::time::timeout(duration, wait).await;
            }
        }
        Ok(())
    }

    /// Cancels any in-progress reconnection attempt and abandons every
    /// pending request with a synthetic network-failure reply (§7
    /// `NetworkFailureSynthetic`).
    pub fn cancel_reconnect(&self) {
        self.inner.reconnect_generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.state.lock().unwrap() = ClientState::Stopped;
        self.inner.abandon_all_pending();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

impl Inner {
    fn is_connected(&self) -> bool {
        *self.state.lock().unwrap() == ClientState::Connected
    }

    async fn resolve_address(&self) -> Result<(String, u16), RespError> {
        let service_name = self.options.lock().unwrap().sentinel_service_name.clone();
        match service_name {
            Some(name) => self.sentinels.get_primary_address_by_name(&name, true).await,
            None => {
                let options = self.options.lock().unwrap();
                Ok((options.host.clone(), options.port))
            }
        }
    }

    async fn dial(&self, host: &str, port: &u16) -> Result<Arc<Connection>, RespError> {
        let connect_timeout = self.options.lock().unwrap().connect_timeout;
        Connection::connect(host, *port, connect_timeout).await
    }

    fn install_connection(self: &Arc<Self>, connection: Arc<Connection>) {
        let weak_for_reply = Arc::downgrade(self);
        connection.set_on_reply(move |reply| {
            if let Some(inner) = weak_for_reply.upgrade() {
                inner.dispatch_reply(reply);
            }
        });
        let weak_for_disconnect = Arc::downgrade(self);
        connection.set_on_disconnect(move || {
            if let Some(inner) = weak_for_disconnect.upgrade() {
                inner.handle_disconnect();
            }
        });
        *self.connection.lock().unwrap() = Some(connection);
    }

    fn dispatch_reply(&self, reply: Reply) {
        let pending = self.pending.lock().unwrap().pop_front();
        if let Some(request) = pending {
            (request.handler)(reply);
        } else {
            log_event!(
                self.log,
                Warn,
                "request_client",
                "reply arrived with no matching pending request"
            );
        }
        if self.pending.lock().unwrap().is_empty() {
            self.drained_event.set();
        }
    }

    fn abandon_all_pending(&self) {
        let drained: Vec<PendingRequest> = self.pending.lock().unwrap().drain(..).collect();
        for request in drained {
            (request.handler)(Reply::network_failure());
        }
        self.drained_event.set();
    }

    fn handle_disconnect(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ClientState::Stopped {
                return;
            }
            *state = ClientState::Reconnecting;
        }
        self.connected_event.reset();
        *self.connection.lock().unwrap() = None;
        log_event!(self.log, Info, "request_client", "connection dropped, reconnecting");

        let this = self.clone();
        let generation = this.reconnect_generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            this.reconnect_loop(generation).await;
        });
    }

    async fn reconnect_loop(self: Arc<Self>, generation: i64) {
        let (max_reconnects, reconnect_interval) = {
            let options = self.options.lock().unwrap();
            (options.max_reconnects, options.reconnect_interval)
        };
        let mut backoffs: Box<dyn Iterator<Item = Duration> + Send> = if max_reconnects < 0 {
            Box::new(RetryStrategy::default().get_infinite_backoff_dur_iterator())
        } else {
            let retries = (max_reconnects as u64).clamp(1, u32::MAX as u64) as u32;
            Box::new(RetryStrategy::new(0, 0, retries, None).get_bounded_backoff_dur_iterator())
        };

        let mut attempt: i64 = 0;
        loop {
            if self.reconnect_generation.load(Ordering::SeqCst) != generation {
                return; // cancel_reconnect() superseded this loop
            }
            if max_reconnects >= 0 && attempt >= max_reconnects {
                log_event!(self.log, Error, "request_client", "reconnection attempts exhausted");
                *self.state.lock().unwrap() = ClientState::Stopped;
                self.abandon_all_pending();
                return;
            }
            attempt += 1;

            if !reconnect_interval.is_zero() {
                let sleep_for = backoffs.next().unwrap_or(reconnect_interval);
                log_event!(self.log, Debug, "request_client", "sleeping {sleep_for:?} before reconnect attempt {attempt}");
                tokio::time::sleep(sleep_for).await;
            }

            if self.reconnect_generation.load(Ordering::SeqCst) != generation {
                return;
            }

            match self.resolve_address().await {
                Ok((host, port)) => match self.dial(&host, &port).await {
                    Ok(connection) => {
                        self.install_connection(connection);
                        self.replay_auth_select_and_pending().await;
                        *self.state.lock().unwrap() = ClientState::Connected;
                        self.connected_event.set();
                        log_event!(self.log, Info, "request_client", "reconnected after {attempt} attempt(s)");
                        return;
                    }
                    Err(err) => {
                        log_event!(self.log, Warn, "request_client", "reconnect attempt {attempt} failed: {err}");
                    }
                },
                Err(err) => {
                    log_event!(self.log, Warn, "request_client", "address lookup failed on reconnect attempt {attempt}: {err}");
                }
            }
        }
    }

    /// Re-issues AUTH, then SELECT, then every still-pending command (in
    /// its original FIFO order) on the freshly (re)connected handle, and
    /// flushes it all in one commit. Order matters: the server must see
    /// AUTH and SELECT before anything buffered while disconnected (§4.E).
    ///
    /// AUTH/SELECT are pushed onto the front of the pending FIFO with a
    /// discarding handler rather than sent as bare, untracked writes: every
    /// reply that comes back on the wire must have a matching FIFO entry
    /// (I2), and the server will answer these exactly like any other
    /// command.
    async fn replay_auth_select_and_pending(&self) {
        let connection = self.connection.lock().unwrap().clone();
        let Some(connection) = connection else { return };

        let mut replay_prefix: Vec<PendingRequest> = Vec::new();
        if let Some(password) = self.password.lock().unwrap().clone() {
            let command = Command::new().arg("AUTH").arg(password);
            connection.send(&command);
            replay_prefix.push(PendingRequest {
                command,
                handler: Box::new(|_| {}),
            });
        }
        if let Some(db_index) = *self.db_index.lock().unwrap() {
            let command = Command::new().arg("SELECT").arg(db_index.to_string());
            connection.send(&command);
            replay_prefix.push(PendingRequest {
                command,
                handler: Box::new(|_| {}),
            });
        }
        {
            let mut pending = self.pending.lock().unwrap();
            for request in pending.iter() {
                connection.send(&request.command);
            }
            for request in replay_prefix.into_iter().rev() {
                pending.push_front(request);
            }
        }
        if let Err(err) = connection.commit() {
            log_event!(self.log, Error, "request_client", "failed to flush replay: {err}");
        }
    }
}
