// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! Sentinel resolver (§4.D): discovers the current primary for a named
//! service by querying a round-robin pool of sentinel processes.
//!
//! Each call opens a short-lived connection, asks one sentinel, and closes
//! it again -- there is no persistent sentinel connection to keep alive or
//! reconnect, unlike [`crate::request_client::RequestClient`]. That is why
//! this module talks to [`crate::transport::TcpTransport`] directly instead
//! of going through [`crate::connection::Connection`].

use crate::codec::RespDecoder;
use crate::error::{NoSentinelsConfigured, RespError};
use crate::logging::{log_event, LogSink};
use crate::reply::{Command, Reply};
use crate::transport::{Transport, TcpTransport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One sentinel process in the pool.
#[derive(Debug, Clone)]
pub struct SentinelDefinition {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl SentinelDefinition {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        SentinelDefinition {
            host: host.into(),
            port,
            connect_timeout,
        }
    }
}

/// Resolves `SENTINEL get-master-addr-by-name` against an insertion-ordered
/// pool of sentinels, round-robining across them and skipping (not
/// removing) any that fail to answer.
pub struct SentinelResolver {
    pool: Mutex<VecDeque<SentinelDefinition>>,
    log: Arc<dyn LogSink>,
}

impl SentinelResolver {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        SentinelResolver {
            pool: Mutex::new(VecDeque::new()),
            log,
        }
    }

    pub fn add_sentinel(&self, definition: SentinelDefinition) {
        self.pool.lock().unwrap().push_back(definition);
    }

    pub fn clear_sentinels(&self) {
        self.pool.lock().unwrap().clear();
    }

    /// Asks the pool, in round-robin order starting just after the last
    /// sentinel that answered, for the current primary of `service_name`.
    /// A sentinel that refuses the connection or times out is skipped in
    /// favor of the next one; the whole pool is tried once before giving
    /// up. `autoconnect` opens and tears down its own connection per call,
    /// which is the only mode this resolver supports (§4.D).
    pub async fn get_primary_address_by_name(
        &self,
        service_name: &str,
        autoconnect: bool,
    ) -> Result<(String, u16), RespError> {
        debug_assert!(autoconnect, "non-autoconnect sentinel mode is not supported");
        let candidates: Vec<SentinelDefinition> = {
            let pool = self.pool.lock().unwrap();
            if pool.is_empty() {
                return Err(RespError::configuration(NoSentinelsConfigured.to_string()));
            }
            pool.iter().cloned().collect()
        };

        let mut last_err = None;
        for (index, sentinel) in candidates.iter().enumerate() {
            match self.ask_one(sentinel, service_name).await {
                Ok(address) => {
                    self.rotate_to_after(index);
                    return Ok(address);
                }
                Err(err) => {
                    log_event!(
                        self.log,
                        Warn,
                        "sentinel",
                        "sentinel {}:{} failed to answer: {err}",
                        sentinel.host,
                        sentinel.port
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(RespError::configuration(NoSentinelsConfigured.to_string())))
    }

    async fn ask_one(
        &self,
        sentinel: &SentinelDefinition,
        service_name: &str,
    ) -> Result<(String, u16), RespError> {
        let mut transport =
            TcpTransport::connect(&sentinel.host, sentinel.port, sentinel.connect_timeout).await?;
        let command = Command::from_args(["SENTINEL", "get-master-addr-by-name", service_name]);
        let mut dst = bytes::BytesMut::new();
        crate::codec::encode_command(&command, &mut dst);
        transport.send_async(&dst).await?;

        let mut decoder = RespDecoder::default();
        let mut raw = Vec::new();
        loop {
            let n = transport.receive_async(&mut raw).await?;
            if n == 0 {
                transport.disconnect(false).await;
                fail!(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "sentinel closed the connection before replying",
                ));
            }
            let replies = decoder.feed(&raw)?;
            raw.clear();
            if let Some(reply) = replies.into_iter().next() {
                transport.disconnect(true).await;
                return parse_primary_reply(&reply);
            }
        }
    }

    /// Leaves the next call starting just after the sentinel that answered
    /// at `answered_index`, so a healthy sentinel doesn't get asked first
    /// every time at the expense of the rest of the pool.
    fn rotate_to_after(&self, answered_index: usize) {
        let mut pool = self.pool.lock().unwrap();
        for _ in 0..=answered_index {
            if let Some(front) = pool.pop_front() {
                pool.push_back(front);
            }
        }
    }
}

fn parse_primary_reply(reply: &Reply) -> Result<(String, u16), RespError> {
    let items = reply
        .as_array()
        .ok_or_else(|| RespError::protocol("sentinel reply was not an array"))?;
    let [host, port] = items else {
        return Err(RespError::protocol(
            "sentinel reply did not contain exactly a host and a port",
        ));
    };
    let host = host
        .as_str()
        .ok_or_else(|| RespError::protocol("sentinel host was not a string"))?
        .to_owned();
    let port: u16 = port
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RespError::protocol("sentinel port was not numeric"))?;
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogSink;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn fake_sentinel_answering(host: &str, port: u16) -> tokio::task::JoinHandle<()> {
        let listener = TcpListener::bind((host, port)).await.unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = socket.read(&mut buf).await.unwrap();
            let reply = b"*2\r\n$9\r\n127.0.0.1\r\n$4\r\n6380\r\n";
            socket.write_all(reply).await.unwrap();
        })
    }

    #[tokio::test]
    async fn resolves_primary_from_a_single_sentinel() {
        let resolver = SentinelResolver::new(Arc::new(NullLogSink));
        let _server = fake_sentinel_answering("127.0.0.1", 17401).await;
        resolver.add_sentinel(SentinelDefinition::new(
            "127.0.0.1",
            17401,
            Duration::from_millis(500),
        ));
        let (host, port) = resolver
            .get_primary_address_by_name("mymaster", true)
            .await
            .unwrap();
        assert_eq!((host.as_str(), port), ("127.0.0.1", 6380));
    }

    #[tokio::test]
    async fn empty_pool_is_a_configuration_error() {
        let resolver = SentinelResolver::new(Arc::new(NullLogSink));
        let err = resolver
            .get_primary_address_by_name("mymaster", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RespError::Configuration(_)));
    }

    #[tokio::test]
    async fn skips_a_down_sentinel_for_the_next_one() {
        let resolver = SentinelResolver::new(Arc::new(NullLogSink));
        // Nothing listens on the first port: connection should be refused
        // (or time out) and the resolver should fall through to the second.
        resolver.add_sentinel(SentinelDefinition::new(
            "127.0.0.1",
            17402,
            Duration::from_millis(200),
        ));
        let _server = fake_sentinel_answering("127.0.0.1", 17403).await;
        resolver.add_sentinel(SentinelDefinition::new(
            "127.0.0.1",
            17403,
            Duration::from_millis(500),
        ));
        let (host, port) = resolver
            .get_primary_address_by_name("mymaster", true)
            .await
            .unwrap();
        assert_eq!((host.as_str(), port), ("127.0.0.1", 6380));
    }
}
