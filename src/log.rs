//! Injected logging sink for the saga core

use crate::CorrelationId;
use std::sync::Mutex;
use tracing::Level;

/// Who a log record is about
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogScope {
    /// Saga type handling the message
    pub saga_type: &'static str,
    /// Message being handled
    pub message_type: &'static str,
    /// Instance the message belongs to
    pub correlation_id: CorrelationId,
}

/// Level-gated log sink handed to repositories at construction
pub trait SagaLog: Send + Sync + 'static {
    /// Whether records at `level` are kept
    fn is_enabled(&self, level: Level) -> bool;
    /// Write one formatted record
    fn emit(&self, level: Level, scope: &LogScope, message: &str);
}

/// Deferred formatting on top of [`SagaLog`]: the message is only built
/// when the level is enabled.
pub trait SagaLogExt: SagaLog {
    /// Format and emit only if `level` is enabled
    fn log_with<F>(&self, level: Level, scope: &LogScope, message: F)
    where
        F: FnOnce() -> String,
    {
        if self.is_enabled(level) {
            self.emit(level, scope, &message());
        }
    }

    /// [`SagaLogExt::log_with`] at DEBUG
    fn debug_with<F: FnOnce() -> String>(&self, scope: &LogScope, message: F) {
        self.log_with(Level::DEBUG, scope, message)
    }

    /// [`SagaLogExt::log_with`] at INFO
    fn info_with<F: FnOnce() -> String>(&self, scope: &LogScope, message: F) {
        self.log_with(Level::INFO, scope, message)
    }

    /// [`SagaLogExt::log_with`] at ERROR
    fn error_with<F: FnOnce() -> String>(&self, scope: &LogScope, message: F) {
        self.log_with(Level::ERROR, scope, message)
    }
}

impl<T: SagaLog + ?Sized> SagaLogExt for T {}

/// Discards everything
pub struct NoOpLog;

impl SagaLog for NoOpLog {
    fn is_enabled(&self, _level: Level) -> bool {
        false
    }

    fn emit(&self, _level: Level, _scope: &LogScope, _message: &str) {}
}

/// Forwards records to `tracing` with structured scope fields
pub struct TracingLog;

impl SagaLog for TracingLog {
    fn is_enabled(&self, level: Level) -> bool {
        match level {
            Level::ERROR => tracing::enabled!(Level::ERROR),
            Level::WARN => tracing::enabled!(Level::WARN),
            Level::INFO => tracing::enabled!(Level::INFO),
            Level::DEBUG => tracing::enabled!(Level::DEBUG),
            _ => tracing::enabled!(Level::TRACE),
        }
    }

    fn emit(&self, level: Level, scope: &LogScope, message: &str) {
        let LogScope {
            saga_type,
            message_type,
            correlation_id,
        } = *scope;
        match level {
            Level::DEBUG => {
                tracing::debug!(saga_type, message_type, %correlation_id, "{message}")
            }
            Level::INFO => {
                tracing::info!(saga_type, message_type, %correlation_id, "{message}")
            }
            Level::WARN => {
                tracing::warn!(saga_type, message_type, %correlation_id, "{message}")
            }
            Level::ERROR => {
                tracing::error!(saga_type, message_type, %correlation_id, "{message}")
            }
            _ => {
                tracing::trace!(saga_type, message_type, %correlation_id, "{message}")
            }
        }
    }
}

/// Record captured by [`MemoryLog`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Level the record was emitted at
    pub level: Level,
    /// Who the record is about
    pub scope: LogScope,
    /// Formatted message
    pub message: String,
}

/// Captures records at or above a minimum level; for tests
pub struct MemoryLog {
    min_level: Level,
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLog {
    /// Capture records at `min_level` and more severe
    pub fn new(min_level: Level) -> Self {
        Self {
            min_level,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Records captured so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Whether any captured message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.records().iter().any(|r| r.message.contains(needle))
    }
}

impl SagaLog for MemoryLog {
    fn is_enabled(&self, level: Level) -> bool {
        // tracing orders levels by verbosity: ERROR < ... < TRACE
        level <= self.min_level
    }

    fn emit(&self, level: Level, scope: &LogScope, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                level,
                scope: *scope,
                message: message.to_owned(),
            });
        }
    }
}
