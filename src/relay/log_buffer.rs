//! Deferred log buffer for broker-callback code.
//!
//! Relay work triggered by a broker delivery runs outside the span of the
//! HTTP request that owns the session. Records are queued through a
//! [`DeferredLog`] handle and emitted by a [`LogFlusher`] task that
//! re-enters the session span on every tick.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Span};

/// Severity of a deferred record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Verbose diagnostics.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable anomaly.
    Warn,
    /// Failed operation.
    Error,
}

/// One queued log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity the record is emitted at.
    pub severity: Severity,
    /// Rendered message.
    pub message: String,
}

/// Cloneable producer handle; appending never blocks or fails.
#[derive(Debug, Clone)]
pub struct DeferredLog {
    tx: mpsc::UnboundedSender<LogRecord>,
}

impl DeferredLog {
    /// Create a producer handle and the flusher that drains it.
    #[must_use]
    pub fn channel() -> (Self, LogFlusher) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, LogFlusher { rx })
    }

    /// Queue a record. Records sent after the flusher stopped are dropped.
    pub fn push(&self, severity: Severity, message: impl Into<String>) {
        let _ = self.tx.send(LogRecord {
            severity,
            message: message.into(),
        });
    }

    /// Queue a [`Severity::Debug`] record.
    pub fn debug(&self, message: impl Into<String>) {
        self.push(Severity::Debug, message);
    }

    /// Queue an [`Severity::Info`] record.
    pub fn info(&self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    /// Queue a [`Severity::Warn`] record.
    pub fn warn(&self, message: impl Into<String>) {
        self.push(Severity::Warn, message);
    }

    /// Queue a [`Severity::Error`] record.
    pub fn error(&self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }
}

/// Consumer side of a [`DeferredLog`].
#[derive(Debug)]
pub struct LogFlusher {
    rx: mpsc::UnboundedReceiver<LogRecord>,
}

impl LogFlusher {
    /// Take every queued record in insertion order.
    pub fn drain(&mut self) -> Vec<LogRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.rx.try_recv() {
            records.push(record);
        }
        records
    }

    /// Drain on every `interval` tick, handing each record to `emit`.
    ///
    /// When `stop` fires the queue is drained one last time and the task
    /// ends.
    pub fn spawn<F>(mut self, interval: Duration, stop: CancellationToken, mut emit: F) -> JoinHandle<()>
    where
        F: FnMut(LogRecord) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        for record in self.drain() {
                            emit(record);
                        }
                    }
                }
            }
            for record in self.drain() {
                emit(record);
            }
        })
    }

    /// Flush through `tracing`, attributing every record to `span`.
    pub fn spawn_traced(self, interval: Duration, stop: CancellationToken, span: Span) -> JoinHandle<()> {
        self.spawn(interval, stop, move |record| {
            let _entered = span.enter();
            emit_traced(&record);
        })
    }
}

fn emit_traced(record: &LogRecord) {
    let message = record.message.as_str();
    match record.severity {
        Severity::Debug => debug!(deferred = true, "{message}"),
        Severity::Info => info!(deferred = true, "{message}"),
        Severity::Warn => warn!(deferred = true, "{message}"),
        Severity::Error => error!(deferred = true, "{message}"),
    }
}
