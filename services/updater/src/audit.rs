//! Audit trail for update activity.
//!
//! Events are immutable records: one per container operation plus one per
//! tick. Appending is best-effort everywhere; a sink failure must never
//! disturb the tick, so implementations swallow and log their own errors.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Tick-level summary.
    Tick,

    /// A container was deliberately not processed (digest-pinned,
    /// unhealthy precheck, disk gate).
    Skip,

    /// A pull happened but no replacement was needed.
    Checked,

    /// A container was replaced and committed.
    Updated,

    /// A replacement failed and the prior container was restored.
    Rollback,

    /// An unexpected per-container failure.
    Error,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event was recorded.
    pub at: DateTime<Utc>,

    /// Event kind.
    pub action: AuditAction,

    /// Container display name, empty for tick-level events.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,

    /// Image reference involved, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Machine-readable reason (`digest_pinned`, `precheck_unhealthy`,
    /// `start_failed`, ...), empty when the action says it all.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Free-form structured detail.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction) -> Self {
        Self {
            at: Utc::now(),
            action,
            container: String::new(),
            image: String::new(),
            reason: String::new(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn container(mut self, name: &str) -> Self {
        self.container = name.to_string();
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Append-only audit sink.
pub trait AuditSink: Send + Sync {
    /// Record an event. Best-effort: implementations must not fail the
    /// caller.
    fn append(&self, event: AuditEvent);
}

/// JSON-lines file sink.
pub struct JsonlAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, event: AuditEvent) {
        let Ok(line) = serde_json::to_string(&event) else {
            warn!("Audit event serialization failed");
            return;
        };
        let _guard = self.lock.lock().unwrap();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            warn!(path = %self.path.display(), error = %err, "Audit append failed");
        }
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events with a given action, in append order.
    pub fn with_action(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
