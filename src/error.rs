// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! Error taxonomy for the protocol engine.
//!
//! Per-command failures reported by the server are never represented here:
//! they travel to the caller as an ordinary [`crate::reply::Reply::Error`]
//! value (see `ServerError` in the design notes). The types in this module
//! are for failures the *engine* itself must react to: a malformed wire
//! stream, a transport that refused or dropped the connection, a timeout,
//! or a caller misconfiguration that can be rejected synchronously.

/// The synthetic payload delivered to a pending request's handler when it is
/// abandoned because reconnection was cancelled or exhausted.
pub const NETWORK_FAILURE_MESSAGE: &[u8] = b"network failure";

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    /// A malformed reply was found on the wire: unknown leading byte, a
    /// non-numeric length field, or a terminator mismatch. Fatal for the
    /// connection that produced it.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport failed to connect, read, or write.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A connect attempt or a `sync_commit` call exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The peer actively refused the connection attempt.
    #[error("connection refused")]
    RefusedByPeer,

    /// Raised synchronously to the caller; no engine state changes.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RespError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        RespError::Protocol(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        RespError::Configuration(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RespError::Timeout)
    }
}

pub type RespResult<T> = Result<T, RespError>;

/// Error raised by [`crate::sentinel::SentinelResolver`] when asked to
/// resolve a service name against an empty pool.
#[derive(Debug, thiserror::Error)]
#[error("no sentinels configured for autoconnect resolution")]
pub struct NoSentinelsConfigured;
