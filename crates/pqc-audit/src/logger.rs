//! Audit logging backends.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::events::{AuditAction, AuditEvent, Severity};

/// Trait for audit trail sinks.
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink could not record the event.
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

impl<T: AuditLogger + ?Sized> AuditLogger for Arc<T> {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        (**self).record(event)
    }
}

impl<T: AuditLogger + ?Sized> AuditLogger for Box<T> {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        (**self).record(event)
    }
}

/// Records `event`, logging a warning instead of failing if the sink errors.
///
/// Audit sink problems never change the outcome of the audited operation.
pub fn record_or_warn(logger: &dyn AuditLogger, event: &AuditEvent) {
    if let Err(e) = logger.record(event) {
        tracing::warn!(
            target: "pqc_audit",
            event_id = %event.event_id(),
            action = %event.action(),
            error = %e,
            "failed to record audit event"
        );
    }
}

/// Audit logger that uses the `tracing` infrastructure.
///
/// Info events go to `info!`, Medium to `warn!`, High and Critical to `error!`.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditLogger {
    prefix: Option<String>,
}

impl TracingAuditLogger {
    /// Creates a new tracing-based audit logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new tracing-based audit logger with a message prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl AuditLogger for TracingAuditLogger {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        let json = event.to_json()?;
        let prefix = self.prefix.as_deref().unwrap_or("AUDIT");
        let event_id = event.event_id();
        let action = event.action();
        let outcome = event.outcome();
        let actor = event.actor();
        let target = event.target();

        match event.severity() {
            Severity::Info => tracing::info!(
                target: "pqc_audit",
                %event_id, %action, %outcome, actor, resource = target,
                event_json = %json,
                "[{prefix}] {action}"
            ),
            Severity::Medium => tracing::warn!(
                target: "pqc_audit",
                %event_id, %action, %outcome, actor, resource = target,
                event_json = %json,
                "[{prefix}] {action}"
            ),
            Severity::High | Severity::Critical => tracing::error!(
                target: "pqc_audit",
                %event_id, %action, %outcome, actor, resource = target,
                event_json = %json,
                "[{prefix}] {action}"
            ),
        }
        Ok(())
    }
}

/// Audit logger that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded events for one action.
    #[must_use]
    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action() == action)
            .cloned()
            .collect()
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// A no-op audit logger for disabled scenarios.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

impl NoopAuditLogger {
    /// Creates a new no-op audit logger.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AuditLogger for NoopAuditLogger {
    fn record(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditError;

    struct BrokenLogger;

    impl AuditLogger for BrokenLogger {
        fn record(&self, _event: &AuditEvent) -> Result<()> {
            Err(AuditError::Sink("disk full".to_string()))
        }
    }

    fn event() -> AuditEvent {
        AuditEvent::success("admin", AuditAction::CrlGenerated, "ca:1")
    }

    #[test]
    fn memory_logger_collects_in_order() {
        let logger = MemoryAuditLogger::new();
        assert!(logger.is_empty());

        logger.record(&event()).unwrap();
        logger
            .record(&AuditEvent::success("admin", AuditAction::CaRevoked, "ca:2"))
            .unwrap();

        let events = logger.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action(), AuditAction::CrlGenerated);
        assert_eq!(logger.events_for(AuditAction::CaRevoked).len(), 1);
    }

    #[test]
    fn tracing_logger_records_all_severities() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let logger = TracingAuditLogger::with_prefix("PKI");
        for severity in [Severity::Info, Severity::Medium, Severity::High, Severity::Critical] {
            logger.record(&event().with_severity(severity)).unwrap();
        }
    }

    #[test]
    fn record_or_warn_swallows_sink_errors() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        record_or_warn(&BrokenLogger, &event());
        assert!(BrokenLogger.record(&event()).is_err());
    }

    #[test]
    fn shared_logger_records_through_arc() {
        let logger = Arc::new(MemoryAuditLogger::new());
        let shared: Arc<dyn AuditLogger> = logger.clone();
        record_or_warn(&shared, &event());
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn noop_logger_accepts_everything() {
        NoopAuditLogger::new().record(&event()).unwrap();
    }

    #[test]
    fn logger_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TracingAuditLogger>();
        assert_send_sync::<MemoryAuditLogger>();
        assert_send_sync::<NoopAuditLogger>();
    }
}
