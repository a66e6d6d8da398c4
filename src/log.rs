//! Injected logging side channel
//!
//! Every connection owns a [`Logger`]: a sink plus a verbosity level. Records
//! above the level are dropped before any formatting happens. Logging never
//! changes control flow; errors are still returned to the caller.
//!
//! The default sink forwards to `tracing`, so applications that already
//! install a `tracing-subscriber` see chunk stream diagnostics next to their
//! own.

use std::fmt;

use crate::error::ErrorKind;

/// Log severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Notice,
    Debug,
}

/// Receives structured log records from a connection
pub trait LogSink: Send {
    fn log(&mut self, severity: Severity, kind: ErrorKind, location: &'static str, message: &str);
}

impl<F> LogSink for F
where
    F: FnMut(Severity, ErrorKind, &'static str, &str) + Send,
{
    fn log(&mut self, severity: Severity, kind: ErrorKind, location: &'static str, message: &str) {
        self(severity, kind, location, message)
    }
}

/// Sink forwarding records to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&mut self, severity: Severity, kind: ErrorKind, location: &'static str, message: &str) {
        match severity {
            Severity::Fatal | Severity::Error => {
                tracing::error!(?kind, location, "{}", message)
            }
            Severity::Warning => tracing::warn!(?kind, location, "{}", message),
            Severity::Notice => tracing::info!(?kind, location, "{}", message),
            Severity::Debug => tracing::debug!(?kind, location, "{}", message),
        }
    }
}

/// A sink filtered by a single verbosity level
pub struct Logger {
    sink: Box<dyn LogSink>,
    level: Severity,
}

impl Logger {
    pub fn new(sink: Box<dyn LogSink>, level: Severity) -> Self {
        Self { sink, level }
    }

    pub fn level(&self) -> Severity {
        self.level
    }

    pub fn set_level(&mut self, level: Severity) {
        self.level = level;
    }

    pub fn enabled(&self, severity: Severity) -> bool {
        severity <= self.level
    }

    /// Format and forward a record if `severity` passes the filter
    pub fn emit(
        &mut self,
        severity: Severity,
        kind: ErrorKind,
        location: &'static str,
        args: fmt::Arguments<'_>,
    ) {
        if self.enabled(severity) {
            let message = args.to_string();
            self.sink.log(severity, kind, location, &message);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Box::new(TracingSink), Severity::Notice)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish()
    }
}

/// Log through a [`Logger`] with the call site as location
macro_rules! chunk_log {
    ($logger:expr, $severity:ident, $kind:ident, $($arg:tt)+) => {
        $logger.emit(
            $crate::log::Severity::$severity,
            $crate::error::ErrorKind::$kind,
            concat!(module_path!(), ":", line!()),
            format_args!($($arg)+),
        )
    };
}

pub(crate) use chunk_log;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_level_filter() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let records = records.clone();
            move |sev: Severity, kind: ErrorKind, location: &'static str, msg: &str| {
                records.lock().unwrap().push((sev, kind, location, msg.to_string()));
            }
        };
        let mut logger = Logger::new(Box::new(sink), Severity::Warning);

        chunk_log!(logger, Fatal, ProtocolInvalid, "bad header on {}", 3);
        chunk_log!(logger, Warning, Warning, "ack divergence");
        chunk_log!(logger, Notice, Info, "dropped");
        chunk_log!(logger, Debug, Info, "dropped too");

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, Severity::Fatal);
        assert_eq!(records[0].1, ErrorKind::ProtocolInvalid);
        assert_eq!(records[0].3, "bad header on 3");
        assert!(records[0].2.contains("log"));
        assert_eq!(records[1].3, "ack divergence");
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Fatal < Severity::Error);
        assert!(Severity::Warning < Severity::Notice);
        let logger = Logger::default();
        assert!(logger.enabled(Severity::Notice));
        assert!(!logger.enabled(Severity::Debug));
    }
}
