use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Auth-state transitions worth a trail. One event per transition; the sink
/// is fire-and-forget and must never fail the operation that emitted it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    PinSetup,
    AuthSuccess,
    AuthFailure,
    Lockout,
    SessionCreated,
    SessionExpired,
    SessionInvalidated,
    PermissionDenied,
    BiometricEnabled,
    ConfigReset,
    StoreError,
}

pub trait AuditSink: Send + Sync {
    fn event(&self, kind: AuditKind, message: &str, details: Option<serde_json::Value>);

    fn critical(&self, kind: AuditKind, message: &str, error: Option<&str>);
}

/// Default sink: structured `tracing` records.
pub struct TracingAuditSink {
    enabled: bool,
}

impl TracingAuditSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl AuditSink for TracingAuditSink {
    fn event(&self, kind: AuditKind, message: &str, details: Option<serde_json::Value>) {
        if !self.enabled {
            return;
        }
        match details {
            Some(details) => info!(?kind, %details, "{message}"),
            None => info!(?kind, "{message}"),
        }
    }

    fn critical(&self, kind: AuditKind, message: &str, err: Option<&str>) {
        if !self.enabled {
            return;
        }
        match err {
            Some(err) => error!(?kind, err, "{message}"),
            None => error!(?kind, "{message}"),
        }
    }
}

/// Sink that drops everything. Handy when the host disables auditing outright.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn event(&self, _kind: AuditKind, _message: &str, _details: Option<serde_json::Value>) {}

    fn critical(&self, kind: AuditKind, message: &str, err: Option<&str>) {
        // Criticals still reach the process log even when auditing is off.
        warn!(?kind, ?err, "{message}");
    }
}

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub kind: AuditKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub critical: bool,
}

/// Recording sink for assertions in tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn count_of(&self, kind: AuditKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn event(&self, kind: AuditKind, message: &str, details: Option<serde_json::Value>) {
        self.events.lock().push(RecordedEvent {
            kind,
            message: message.to_string(),
            details,
            critical: false,
        });
    }

    fn critical(&self, kind: AuditKind, message: &str, err: Option<&str>) {
        self.events.lock().push(RecordedEvent {
            kind,
            message: message.to_string(),
            details: err.map(|e| serde_json::json!({ "error": e })),
            critical: true,
        });
    }
}
