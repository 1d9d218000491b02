// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! Stream consumer (§4.H, optional): a bounded-concurrency long-poll loop
//! over a server-side stream consumer group.
//!
//! Blocking reads (`XREADGROUP ... BLOCK`) and acknowledgements
//! (`XACK`) are issued on two different [`RequestClient`] instances so a
//! slow ack never delays the next blocking read, and vice versa --
//! grounded on the same "dedicated connection per concern" shape
//! `standalone_client.rs` uses for its push-notification connection versus
//! its request connection. Entries are dispatched to a handler run on a
//! bounded pool: the next blocking read is only issued once there is room
//! for at least one more in-flight entry.

use crate::future;
use crate::reply::{Command, Reply};
use crate::request_client::RequestClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Clone, Debug)]
pub struct StreamConsumerOptions {
    pub stream_key: Vec<u8>,
    pub group: Vec<u8>,
    pub consumer: Vec<u8>,
    /// Passed as `XREADGROUP ... BLOCK <millis>`.
    pub block_timeout: Duration,
    /// Passed as `XREADGROUP ... COUNT <count>`.
    pub count: usize,
    /// Maximum number of entries being handled concurrently.
    pub max_in_flight: usize,
}

/// An entry read from the stream: its ID and its flat field/value pairs.
pub type StreamEntry = (Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>);

/// Returns `true` from the handler to acknowledge the entry; `false` to
/// leave it pending (for a later `XCLAIM` or redelivery, out of scope
/// here).
pub type EntryHandler = Arc<dyn Fn(&StreamEntry) -> bool + Send + Sync>;

pub struct StreamConsumer {
    reader: RequestClient,
    acker: RequestClient,
    options: StreamConsumerOptions,
    in_flight: Arc<Semaphore>,
}

impl StreamConsumer {
    pub fn new(reader: RequestClient, acker: RequestClient, options: StreamConsumerOptions) -> Self {
        let in_flight = Arc::new(Semaphore::new(options.max_in_flight.max(1)));
        StreamConsumer {
            reader,
            acker,
            options,
            in_flight,
        }
    }

    /// Runs until `handler` itself never returns (i.e. forever, one loop
    /// iteration per blocking read) or a read fails outright.
    pub async fn run(&self, handler: EntryHandler) -> Result<(), crate::error::RespError> {
        loop {
            let first_permit = self
                .in_flight
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");

            let reply = future::send(&self.reader, self.build_read_command()).await;
            if reply.is_error() {
                return Err(crate::error::RespError::protocol(format!(
                    "XREADGROUP failed: {reply:?}"
                )));
            }

            let mut entries = parse_xreadgroup_reply(&reply).into_iter();
            let Some(first) = entries.next() else {
                drop(first_permit);
                continue; // BLOCK timed out with nothing new
            };
            self.spawn_dispatch(first_permit, first, handler.clone());

            for entry in entries {
                let permit = self
                    .in_flight
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                self.spawn_dispatch(permit, entry, handler.clone());
            }
        }
    }

    fn build_read_command(&self) -> Command {
        Command::new()
            .arg("XREADGROUP")
            .arg("GROUP")
            .arg(self.options.group.clone())
            .arg(self.options.consumer.clone())
            .arg("COUNT")
            .arg(self.options.count.to_string())
            .arg("BLOCK")
            .arg(self.options.block_timeout.as_millis().to_string())
            .arg("STREAMS")
            .arg(self.options.stream_key.clone())
            .arg(">")
    }

    fn spawn_dispatch(
        &self,
        permit: tokio::sync::OwnedSemaphorePermit,
        entry: StreamEntry,
        handler: EntryHandler,
    ) {
        let acker = self.acker.clone();
        let stream_key = self.options.stream_key.clone();
        let group = self.options.group.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let (id, _) = &entry;
            let should_ack = handler(&entry);
            if should_ack {
                let command = Command::new()
                    .arg("XACK")
                    .arg(stream_key)
                    .arg(group)
                    .arg(id.clone());
                let _ = future::send(&acker, command).await;
            }
        });
    }
}

/// Parses an `XREADGROUP` reply (an array of `[stream_key, entries]`
/// pairs) into a flat list of entries, dropping the per-stream grouping
/// since this consumer only ever reads one stream key.
fn parse_xreadgroup_reply(reply: &Reply) -> Vec<StreamEntry> {
    let Some(streams) = reply.as_array() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for stream in streams {
        let Some([_key, entries]) = stream.as_array() else {
            continue;
        };
        let Some(entries) = entries.as_array() else {
            continue;
        };
        for entry in entries {
            let Some([id, fields]) = entry.as_array() else {
                continue;
            };
            let Some(id) = id.as_str() else { continue };
            let Some(fields) = fields.as_array() else {
                continue;
            };
            let mut pairs = Vec::with_capacity(fields.len() / 2);
            let mut it = fields.iter();
            while let (Some(field), Some(value)) = (it.next(), it.next()) {
                let (Some(field), Some(value)) = (bytes_of(field), bytes_of(value)) else {
                    continue;
                };
                pairs.push((field.to_vec(), value.to_vec()));
            }
            out.push((id.as_bytes().to_vec(), pairs));
        }
    }
    out
}

fn bytes_of(reply: &Reply) -> Option<&[u8]> {
    match reply {
        Reply::BulkString(b) | Reply::SimpleString(b) => Some(b),
        _ => None,
    }
}
