//! Observability events.

use crate::object::ObjectKey;

/// Severity of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Routine lifecycle event.
    Normal,
    /// Something went wrong.
    Warning,
}

/// Fire-and-forget event sink.
///
/// Emission never returns an error and must never block reconciliation;
/// sinks that talk to slow backends should buffer or drop.
pub trait EventSink: Send + Sync {
    /// Emit one event about an object.
    fn emit(&self, key: &ObjectKey, kind: &str, severity: Severity, reason: &str, message: &str);
}

/// Event sink backed by structured tracing records.
#[derive(Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, key: &ObjectKey, kind: &str, severity: Severity, reason: &str, message: &str) {
        match severity {
            Severity::Normal => {
                tracing::info!(object = %key, kind = %kind, reason = %reason, "{}", message);
            }
            Severity::Warning => {
                tracing::warn!(object = %key, kind = %kind, reason = %reason, "{}", message);
            }
        }
    }
}
