// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0
//! Log sink (§9 design notes): the engine never reaches for a process-wide
//! logger singleton. Every component that wants to log holds an
//! `Arc<dyn LogSink>`, defaulting to [`TracingLogSink`], so an embedder can
//! swap in their own collector (or a no-op, for tests that don't want
//! `tracing`'s global subscriber touched) without the engine caring.
//!
//! This replaces the ambient `log_callback` global the original HA client
//! configured once at process start -- grounded on `logger_core`'s
//! `tracing`-backed sink, but injected rather than global so two
//! [`crate::request_client::RequestClient`] instances in one process can
//! log to different places.

use std::sync::Arc;

/// Severity of a logged event, mirroring the levels `logger_core` exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, target: &str, message: &str);
}

/// Default sink: forwards to `tracing`'s ambient subscriber, whatever (if
/// anything) the embedding binary has installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: LogLevel, target: &str, message: &str) {
        match level {
            LogLevel::Error => tracing::error!(target: "resp_client", source = target, "{}", message),
            LogLevel::Warn => tracing::warn!(target: "resp_client", source = target, "{}", message),
            LogLevel::Info => tracing::info!(target: "resp_client", source = target, "{}", message),
            LogLevel::Debug => tracing::debug!(target: "resp_client", source = target, "{}", message),
            LogLevel::Trace => tracing::trace!(target: "resp_client", source = target, "{}", message),
        }
    }
}

/// Sink that discards everything, for tests that don't want log noise or a
/// dependency on the ambient `tracing` subscriber being installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _level: LogLevel, _target: &str, _message: &str) {}
}

pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingLogSink)
}

macro_rules! log_event {
    ($sink:expr, $level:ident, $target:expr, $($arg:tt)*) => {
        $sink.log($crate::logging::LogLevel::$level, $target, &format!($($arg)*))
    };
}

pub(crate) use log_event;
