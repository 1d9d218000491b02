// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

//! A pipelining, pub/sub-aware, sentinel-HA-aware client for RESP-speaking
//! data servers.
//!
//! This crate implements the protocol engine only: a wire codec, a
//! transport adapter, a connection that couples the two, a sentinel
//! resolver, and the two stateful clients built on top of a connection --
//! [`request_client::RequestClient`] for ordinary pipelined
//! request/response traffic and [`subscriber_client::SubscriberClient`]
//! for `SUBSCRIBE`/`PSUBSCRIBE`. What RESP commands to send and how to
//! parse their replies into typed values is deliberately left to callers
//! or to a higher-level command-catalog crate built on top of this one.
//!
//! # Layout
//!
//! - [`reply`] -- the [`reply::Reply`] value and the [`reply::Command`] argv
//! - [`codec`] -- encode/decode between [`reply::Command`]/[`reply::Reply`] and bytes
//! - [`transport`] -- the raw duplex byte stream
//! - [`connection`] -- couples a codec to a transport, one reply/disconnect handler at a time
//! - [`sentinel`] -- primary discovery against a pool of sentinels
//! - [`request_client`] -- FIFO pipelining client with reconnection
//! - [`subscriber_client`] -- push-message demultiplexing client with reconnection
//! - [`future`] -- an async/await adapter over [`request_client::RequestClient`]
//! - [`stream_consumer`] -- optional bounded-concurrency stream consumer-group loop
//! - [`kill`] -- a typed `CLIENT KILL` filter builder
//! - [`logging`] -- the injected log sink every other module reports through
//! - [`error`] -- the engine-level error taxonomy

#[macro_use]
mod macros;

pub mod codec;
pub mod connection;
pub mod error;
pub mod future;
pub mod kill;
pub mod logging;
pub mod reply;
mod retry_strategies;
pub mod sentinel;
pub mod request_client;
pub mod stream_consumer;
pub mod subscriber_client;
pub mod transport;

pub use codec::{RespCodec, RespDecoder};
pub use error::{RespError, RespResult};
pub use kill::{ClientKill, ClientKillFilter, ClientType};
pub use logging::{LogLevel, LogSink};
pub use reply::{Command, Reply};
pub use request_client::{RequestClient, RequestClientOptions};
pub use sentinel::{SentinelDefinition, SentinelResolver};
pub use subscriber_client::{
    AckHandler, MessageHandler, PatternMessageHandler, SubscriberClient, SubscriberClientOptions,
};
