// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! Future adapter (§4.G): wraps [`crate::request_client::RequestClient`]'s
//! callback surface in a single-assignment `Future`, for callers who would
//! rather `.await` a reply than register a handler.
//!
//! Grounded on the oneshot-per-request pattern in
//! `aio/multiplexed_connection.rs` (`PipelineMessage` carries a
//! `oneshot::Sender` that the pipeline's reader half resolves exactly
//! once); this module is the same idea at the public-API layer instead of
//! internal to the connection.

use crate::reply::{Command, Reply};
use crate::request_client::RequestClient;
use tokio::sync::oneshot;

/// Sends `command` through `client` and resolves to its reply. Equivalent
/// to calling [`RequestClient::send`] with a handler that fulfils a
/// one-shot channel, then immediately [`RequestClient::commit`]ting.
///
/// The returned future is fulfilled exactly once, including in the case
/// where the request is abandoned mid-reconnect and receives the synthetic
/// network-failure reply (§7 `NetworkFailureSynthetic`) instead of a real
/// one -- from this adapter's point of view that is just another `Reply`.
pub async fn send(client: &RequestClient, command: Command) -> Reply {
    let (tx, rx) = oneshot::channel();
    client.send(command, move |reply| {
        // The receiver may already be gone if the caller dropped the
        // future; there is nothing to do about that but ignore it.
        let _ = tx.send(reply);
    });
    let _ = client.commit();
    rx.await.unwrap_or_else(|_| Reply::network_failure())
}

/// Queues `command` behind `handler` like [`RequestClient::send`], but
/// resolves a future instead of invoking a callback, without forcing an
/// immediate `commit` -- useful for batching several futures before one
/// shared flush.
pub fn queue(client: &RequestClient, command: Command) -> impl std::future::Future<Output = Reply> {
    let (tx, rx) = oneshot::channel();
    client.send(command, move |reply| {
        let _ = tx.send(reply);
    });
    async move { rx.await.unwrap_or_else(|_| Reply::network_failure()) }
}
