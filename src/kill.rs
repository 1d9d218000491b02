// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! `CLIENT KILL` builder (§9 design notes).
//!
//! The command-catalog layer is out of scope for this crate (§1
//! non-goals), but `CLIENT KILL`'s filter syntax is awkward enough -- and
//! common enough in HA failover tooling -- that the design notes call out
//! building it as a small typed builder rather than leaving every caller
//! to hand-assemble the argument list.

use crate::reply::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Normal,
    Primary,
    Replica,
    Pubsub,
}

impl ClientType {
    fn as_str(self) -> &'static str {
        match self {
            ClientType::Normal => "normal",
            ClientType::Primary => "master",
            ClientType::Replica => "replica",
            ClientType::Pubsub => "pubsub",
        }
    }
}

/// One filter in a `CLIENT KILL` invocation. Several may be combined; the
/// server ANDs them together.
#[derive(Debug, Clone)]
pub enum ClientKillFilter {
    Addr(String, u16),
    Id(u64),
    Type(ClientType),
    SkipMe(bool),
}

/// Builds a `CLIENT KILL` command from zero or more filters.
///
/// ```ignore
/// let command = ClientKill::new()
///     .filter(ClientKillFilter::Type(ClientType::Replica))
///     .filter(ClientKillFilter::SkipMe(true))
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientKill {
    filters: Vec<ClientKillFilter>,
}

impl ClientKill {
    pub fn new() -> Self {
        ClientKill {
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: ClientKillFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn addr(self, host: impl Into<String>, port: u16) -> Self {
        self.filter(ClientKillFilter::Addr(host.into(), port))
    }

    pub fn id(self, id: u64) -> Self {
        self.filter(ClientKillFilter::Id(id))
    }

    pub fn client_type(self, client_type: ClientType) -> Self {
        self.filter(ClientKillFilter::Type(client_type))
    }

    pub fn skip_me(self, skip: bool) -> Self {
        self.filter(ClientKillFilter::SkipMe(skip))
    }

    pub fn build(self) -> Command {
        let mut command = Command::new().arg("CLIENT").arg("KILL");
        for filter in self.filters {
            command = match filter {
                ClientKillFilter::Addr(host, port) => command
                    .arg("ADDR")
                    .arg(format!("{host}:{port}")),
                ClientKillFilter::Id(id) => command.arg("ID").arg(id.to_string()),
                ClientKillFilter::Type(client_type) => {
                    command.arg("TYPE").arg(client_type.as_str())
                }
                ClientKillFilter::SkipMe(skip) => {
                    command.arg("SKIPME").arg(if skip { "yes" } else { "no" })
                }
            };
        }
        command
    }
}
