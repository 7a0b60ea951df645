//! Audit trail of routed operations.

// Mutex.lock().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One routed operation, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub user_id: String,
    pub provider_id: String,
    pub operation: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub success: bool,
    /// Error kind name on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Receives one event per routed operation.
///
/// Called inline on the request path; implementations that persist events
/// should hand them off rather than block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits audit events as `tracing` records under the `fsgate::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        if event.success {
            tracing::info!(
                target: "fsgate::audit",
                user_id = %event.user_id,
                provider_id = %event.provider_id,
                operation = %event.operation,
                path = %event.path,
                duration_ms = event.duration_ms,
                "operation succeeded"
            );
        } else {
            tracing::warn!(
                target: "fsgate::audit",
                user_id = %event.user_id,
                provider_id = %event.provider_id,
                operation = %event.operation,
                path = %event.path,
                error = event.error.as_deref().unwrap_or("unknown"),
                duration_ms = event.duration_ms,
                "operation failed"
            );
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
