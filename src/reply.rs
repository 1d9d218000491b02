// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! The tagged reply value produced by the decoder (§3 data model).

use std::fmt;

/// A decoded RESP reply. Immutable once produced.
///
/// `Null` collapses the wire's two spellings of "nothing" (`$-1\r\n` and
/// `*-1\r\n`) into a single variant, since no caller in this engine needs to
/// tell them apart.
#[derive(Clone, PartialEq)]
pub enum Reply {
    Error(Vec<u8>),
    SimpleString(Vec<u8>),
    BulkString(Vec<u8>),
    Null,
    Integer(i64),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::SimpleString(b"OK".to_vec())
    }

    /// Builds the synthetic reply delivered to handlers abandoned during an
    /// unsuccessful reconnect (§7, `NetworkFailureSynthetic`).
    pub fn network_failure() -> Reply {
        Reply::Error(crate::error::NETWORK_FAILURE_MESSAGE.to_vec())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::SimpleString(b) | Reply::BulkString(b) | Reply::Error(b) => {
                std::str::from_utf8(b).ok()
            }
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Error(b) => write!(f, "Error({:?})", String::from_utf8_lossy(b)),
            Reply::SimpleString(b) => write!(f, "SimpleString({:?})", String::from_utf8_lossy(b)),
            Reply::BulkString(b) => write!(f, "BulkString({:?})", String::from_utf8_lossy(b)),
            Reply::Null => write!(f, "Null"),
            Reply::Integer(n) => write!(f, "Integer({n})"),
            Reply::Array(items) => f.debug_list().entries(items).finish(),
        }
    }
}

/// An ordered sequence of binary-safe argument strings, argv-like.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
}

impl Command {
    pub fn new() -> Self {
        Command { args: Vec::new() }
    }

    /// Builds a command from a fixed list of string-like arguments; the
    /// common case for the command-catalog layer (out of scope here, but
    /// tests and examples build commands this way too).
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        Command {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl<S: Into<Vec<u8>>> FromIterator<S> for Command {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Command::from_args(iter)
    }
}
