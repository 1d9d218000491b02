// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! Subscriber client (§4.F): a connection dedicated to `SUBSCRIBE`,
//! `PSUBSCRIBE` and their unsubscribe counterparts, demultiplexing push
//! messages to per-channel and per-pattern handlers.
//!
//! Shares the reconnect/backoff shape of [`crate::request_client`] (same
//! grounding in `reconnecting_connection.rs`), but reply dispatch is
//! classified by message shape instead of FIFO position -- there is no
//! pending-request queue here, because subscribe acknowledgements and
//! published messages can arrive in any order relative to one another
//! (§4.F, invariant I3).

use crate::connection::Connection;
use crate::error::RespError;
use crate::logging::{log_event, LogSink};
use crate::reply::{Command, Reply};
use crate::retry_strategies::RetryStrategy;
use crate::sentinel::SentinelResolver;
use futures_intrusive::sync::ManualResetEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type MessageHandler = Arc<dyn Fn(&[u8], &[u8]) + Send + Sync>;
pub type PatternMessageHandler = Arc<dyn Fn(&[u8], &[u8], &[u8]) + Send + Sync>;
/// Called with the current subscription count once the server acknowledges
/// a `subscribe`/`psubscribe` for the selector it was registered against.
pub type AckHandler = Arc<dyn Fn(i64) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ClientState {
    Disconnected,
    Connected,
    Reconnecting,
    Stopped,
}

/// Configuration that survives every reconnect, mirroring
/// [`crate::request_client::RequestClientOptions`].
pub struct SubscriberClientOptions {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// `-1` retries forever; `0` (the default, per §6) means don't retry.
    pub max_reconnects: i64,
    /// `0` disables the backoff sleep between attempts entirely.
    pub reconnect_interval: Duration,
    pub sentinel_service_name: Option<String>,
}

impl Default for SubscriberClientOptions {
    fn default() -> Self {
        SubscriberClientOptions {
            host: "127.0.0.1".to_string(),
            port: 6379,
            connect_timeout: Duration::ZERO,
            max_reconnects: 0,
            reconnect_interval: Duration::ZERO,
            sentinel_service_name: None,
        }
    }
}

struct Inner {
    host: Mutex<String>,
    port: Mutex<u16>,
    connect_timeout: Duration,
    reconnect_interval: Duration,
    max_reconnects: i64,
    sentinel_service_name: Mutex<Option<String>>,
    connection: Mutex<Option<Arc<Connection>>>,
    subscribed: Mutex<HashMap<Vec<u8>, Vec<(MessageHandler, Option<AckHandler>)>>>,
    pattern_subscribed: Mutex<HashMap<Vec<u8>, Vec<(PatternMessageHandler, Option<AckHandler>)>>>,
    password: Mutex<Option<Vec<u8>>>,
    auth_pending: AtomicBool,
    state: Mutex<ClientState>,
    connected_event: ManualResetEvent,
    reconnect_generation: AtomicI64,
    sentinels: SentinelResolver,
    log: Arc<dyn LogSink>,
}

/// A connection that only ever issues subscribe/unsubscribe commands and
/// receives push messages in return.
#[derive(Clone)]
pub struct SubscriberClient {
    inner: Arc<Inner>,
}

impl SubscriberClient {
    pub fn new(options: SubscriberClientOptions, log: Arc<dyn LogSink>) -> SubscriberClient {
        let inner = Arc::new(Inner {
            host: Mutex::new(options.host),
            port: Mutex::new(options.port),
            connect_timeout: options.connect_timeout,
            reconnect_interval: options.reconnect_interval,
            max_reconnects: options.max_reconnects,
            sentinel_service_name: Mutex::new(options.sentinel_service_name),
            connection: Mutex::new(None),
            subscribed: Mutex::new(HashMap::new()),
            pattern_subscribed: Mutex::new(HashMap::new()),
            password: Mutex::new(None),
            auth_pending: AtomicBool::new(false),
            state: Mutex::new(ClientState::Disconnected),
            connected_event: ManualResetEvent::new(false),
            reconnect_generation: AtomicI64::new(0),
            sentinels: SentinelResolver::new(log.clone()),
            log,
        });
        SubscriberClient { inner }
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

    /// Switches address resolution from the fixed `host`/`port` given to
    /// [`SubscriberClient::new`] to a sentinel-discovered primary, taking
    /// effect on the next connect or reconnect.
    pub fn use_sentinel_service(&self, service_name: impl Into<String>) {
        *self.inner.sentinel_service_name.lock().unwrap() = Some(service_name.into());
    }

    pub async fn connect(&self) -> Result<(), RespError> {
        let (host, port) = self.inner.resolve_address().await?;
        let connection = Connection::connect(&host, port, self.inner.connect_timeout).await?;
        self.inner.install_connection(connection);
        self.inner.replay_subscriptions_and_auth();
        *self.inner.state.lock().unwrap() = ClientState::Connected;
        self.inner.connected_event.set();
        Ok(())
    }

    pub fn auth(&self, password: impl Into<Vec<u8>>) {
        let password = password.into();
        *self.inner.password.lock().unwrap() = Some(password.clone());
        if self.is_connected() {
            self.inner.auth_pending.store(true, Ordering::SeqCst);
            self.inner.send_command(Command::new().arg("AUTH").arg(password));
            let _ = self.commit();
        }
    }

    pub fn subscribe(&self, channel: impl Into<Vec<u8>>, handler: MessageHandler) {
        self.subscribe_with_ack(channel, handler, None)
    }

    /// Like [`SubscriberClient::subscribe`], additionally registering
    /// `on_ack` to be called with the current subscription count once the
    /// server's acknowledgement for this channel arrives (§3 "Subscription
    /// entry", `on_acknowledgement`).
    pub fn subscribe_with_ack(
        &self,
        channel: impl Into<Vec<u8>>,
        handler: MessageHandler,
        on_ack: Option<AckHandler>,
    ) {
        let channel = channel.into();
        self.inner
            .subscribed
            .lock()
            .unwrap()
            .entry(channel.clone())
            .or_default()
            .push((handler, on_ack));
        self.inner.send_command(Command::new().arg("SUBSCRIBE").arg(channel));
    }

    pub fn psubscribe(&self, pattern: impl Into<Vec<u8>>, handler: PatternMessageHandler) {
        self.psubscribe_with_ack(pattern, handler, None)
    }

    /// Like [`SubscriberClient::psubscribe`], additionally registering
    /// `on_ack` for this pattern's acknowledgement.
    pub fn psubscribe_with_ack(
        &self,
        pattern: impl Into<Vec<u8>>,
        handler: PatternMessageHandler,
        on_ack: Option<AckHandler>,
    ) {
        let pattern = pattern.into();
        self.inner
            .pattern_subscribed
            .lock()
            .unwrap()
            .entry(pattern.clone())
            .or_default()
            .push((handler, on_ack));
        self.inner
            .send_command(Command::new().arg("PSUBSCRIBE").arg(pattern));
    }

    pub fn unsubscribe(&self, channel: impl Into<Vec<u8>>) {
        let channel = channel.into();
        self.inner.subscribed.lock().unwrap().remove(&channel);
        self.inner
            .send_command(Command::new().arg("UNSUBSCRIBE").arg(channel));
    }

    pub fn punsubscribe(&self, pattern: impl Into<Vec<u8>>) {
        let pattern = pattern.into();
        self.inner.pattern_subscribed.lock().unwrap().remove(&pattern);
        self.inner
            .send_command(Command::new().arg("PUNSUBSCRIBE").arg(pattern));
    }

    pub fn commit(&self) -> Result<(), RespError> {
        if *self.inner.state.lock().unwrap() != ClientState::Connected {
            return Ok(());
        }
        if let Some(connection) = self.inner.connection.lock().unwrap().as_ref() {
            connection.commit()?;
        }
        Ok(())
    }

    pub fn cancel_reconnect(&self) {
        self.inner.reconnect_generation.fetch_add(1, Ordering::SeqCst);
        *self.inner.state.lock().unwrap() = ClientState::Stopped;
        self.inner.subscribed.lock().unwrap().clear();
        self.inner.pattern_subscribed.lock().unwrap().clear();
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state.lock().unwrap() == ClientState::Connected
    }
}

impl Inner {
    async fn resolve_address(&self) -> Result<(String, u16), RespError> {
        let service_name = self.sentinel_service_name.lock().unwrap().clone();
        match service_name {
            Some(name) => self.sentinels.get_primary_address_by_name(&name, true).await,
            None => Ok((self.host.lock().unwrap().clone(), *self.port.lock().unwrap())),
        }
    }

    fn send_command(&self, command: Command) {
        if let Some(connection) = self.connection.lock().unwrap().as_ref() {
            connection.send(&command);
        }
    }

    fn install_connection(self: &Arc<Self>, connection: Arc<Connection>) {
        let weak_for_reply = Arc::downgrade(self);
        connection.set_on_reply(move |reply| {
            if let Some(inner) = weak_for_reply.upgrade() {
                inner.dispatch_push(reply);
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

    /// Classifies one inbound reply per invariant I3 and routes it.
    fn dispatch_push(&self, reply: Reply) {
        let Some(items) = reply.as_array() else {
            // A bare (non-array) reply can only be the one pending AUTH
            // acknowledgement; anything else here is a protocol misuse by
            // the peer and is logged, not panicked on.
            if self.auth_pending.swap(false, Ordering::SeqCst) {
                if reply.is_error() {
                    log_event!(self.log, Warn, "subscriber_client", "AUTH failed: {reply:?}");
                }
            } else {
                log_event!(self.log, Warn, "subscriber_client", "unexpected non-array push: {reply:?}");
            }
            return;
        };

        match items {
            [kind, target, count] if count.as_integer().is_some() => {
                let kind_str = kind.as_str().unwrap_or("");
                let count = count.as_integer().unwrap_or(0);
                let Some(target) = bytes_of(target) else { return };
                match kind_str {
                    "subscribe" => {
                        let acks: Vec<AckHandler> = self
                            .subscribed
                            .lock()
                            .unwrap()
                            .get(target)
                            .map(|handlers| handlers.iter().filter_map(|(_, ack)| ack.clone()).collect())
                            .unwrap_or_default();
                        for ack in acks {
                            ack(count);
                        }
                    }
                    "psubscribe" => {
                        let acks: Vec<AckHandler> = self
                            .pattern_subscribed
                            .lock()
                            .unwrap()
                            .get(target)
                            .map(|handlers| handlers.iter().filter_map(|(_, ack)| ack.clone()).collect())
                            .unwrap_or_default();
                        for ack in acks {
                            ack(count);
                        }
                    }
                    other => {
                        log_event!(self.log, Warn, "subscriber_client", "unrecognized acknowledgement kind {other}");
                    }
                }
            }
            [kind, channel, payload] if kind.as_str() == Some("message") => {
                let (Some(channel), Some(payload)) = (bytes_of(channel), bytes_of(payload)) else {
                    return;
                };
                let handlers = self.subscribed.lock().unwrap().get(channel).cloned();
                if let Some(handlers) = handlers {
                    for (handler, _) in handlers {
                        handler(channel, payload);
                    }
                }
            }
            [kind, pattern, channel, payload] if kind.as_str() == Some("pmessage") => {
                let (Some(pattern), Some(channel), Some(payload)) =
                    (bytes_of(pattern), bytes_of(channel), bytes_of(payload))
                else {
                    return;
                };
                let handlers = self.pattern_subscribed.lock().unwrap().get(pattern).cloned();
                if let Some(handlers) = handlers {
                    for (handler, _) in handlers {
                        handler(pattern, channel, payload);
                    }
                }
            }
            other => {
                log_event!(self.log, Warn, "subscriber_client", "unrecognized push shape, {} elements", other.len());
            }
        }
    }

    /// Re-issues AUTH (if remembered) and every active subscription before
    /// any further `commit` is allowed to proceed (§4.F).
    fn replay_subscriptions_and_auth(&self) {
        let connection = self.connection.lock().unwrap().clone();
        let Some(connection) = connection else { return };

        if let Some(password) = self.password.lock().unwrap().clone() {
            self.auth_pending.store(true, Ordering::SeqCst);
            connection.send(&Command::new().arg("AUTH").arg(password));
        }
        for channel in self.subscribed.lock().unwrap().keys() {
            connection.send(&Command::new().arg("SUBSCRIBE").arg(channel.clone()));
        }
        for pattern in self.pattern_subscribed.lock().unwrap().keys() {
            connection.send(&Command::new().arg("PSUBSCRIBE").arg(pattern.clone()));
        }
        if let Err(err) = connection.commit() {
            log_event!(self.log, Error, "subscriber_client", "failed to flush replay: {err}");
        }
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
        log_event!(self.log, Info, "subscriber_client", "connection dropped, reconnecting");

        let this = self.clone();
        let generation = this.reconnect_generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            this.reconnect_loop(generation).await;
        });
    }

    async fn reconnect_loop(self: Arc<Self>, generation: i64) {
        let mut backoffs: Box<dyn Iterator<Item = Duration> + Send> = if self.max_reconnects < 0 {
            Box::new(RetryStrategy::default().get_infinite_backoff_dur_iterator())
        } else {
            let retries = (self.max_reconnects as u64).clamp(1, u32::MAX as u64) as u32;
            Box::new(RetryStrategy::new(0, 0, retries, None).get_bounded_backoff_dur_iterator())
        };

        let mut attempt: i64 = 0;
        loop {
            if self.reconnect_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if self.max_reconnects >= 0 && attempt >= self.max_reconnects {
                log_event!(self.log, Error, "subscriber_client", "reconnection attempts exhausted");
                *self.state.lock().unwrap() = ClientState::Stopped;
                self.subscribed.lock().unwrap().clear();
                self.pattern_subscribed.lock().unwrap().clear();
                return;
            }
            attempt += 1;

            if !self.reconnect_interval.is_zero() {
                let sleep_for = backoffs.next().unwrap_or(self.reconnect_interval);
                tokio::time::sleep(sleep_for).await;
            }
            if self.reconnect_generation.load(Ordering::SeqCst) != generation {
                return;
            }

            match self.resolve_address().await {
                Ok((host, port)) => {
                    match Connection::connect(&host, port, self.connect_timeout).await {
                        Ok(connection) => {
                            self.install_connection(connection);
                            self.replay_subscriptions_and_auth();
                            *self.state.lock().unwrap() = ClientState::Connected;
                            self.connected_event.set();
                            log_event!(self.log, Info, "subscriber_client", "reconnected after {attempt} attempt(s)");
                            return;
                        }
                        Err(err) => {
                            log_event!(self.log, Warn, "subscriber_client", "reconnect attempt {attempt} failed: {err}");
                        }
                    }
                }
                Err(err) => {
                    log_event!(self.log, Warn, "subscriber_client", "address lookup failed on reconnect attempt {attempt}: {err}");
                }
            }
        }
    }
}

fn bytes_of(reply: &Reply) -> Option<&[u8]> {
    match reply {
        Reply::BulkString(b) | Reply::SimpleString(b) | Reply::Error(b) => Some(b),
        _ => None,
    }
}
