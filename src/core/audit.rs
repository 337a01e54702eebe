//! Per-request audit records.
//!
//! Every request that enters the gateway produces exactly one [`AuditRecord`].
//! The orchestrator fills a [`PendingAudit`] as the request moves through its
//! states; the record is emitted when the guard is completed or, if the request
//! future is dropped first, when the guard itself is dropped. Emission is handed
//! to a spawned task and never awaited on the response path.
use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{config::RouteDecision, core::plugins::PluginVerdict, ports::AuditSink};

/// Error recorded when the client goes away before the request finishes.
pub const CANCELLED: &str = "request cancelled";

/// What actually served the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Mock,
    Proxy,
    ProxyFallbackToMock,
}

impl AuditDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditDecision::Mock => "mock",
            AuditDecision::Proxy => "proxy",
            AuditDecision::ProxyFallbackToMock => "proxy_fallback_to_mock",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Done,
    Aborted,
    /// Also the state of a record that was never completed
    #[default]
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct AuditRecord {
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub scenario: Option<String>,
    /// What the rule matcher decided
    pub route_decision: Option<RouteDecision>,
    /// `None` when the request never got routed
    pub decision: Option<AuditDecision>,
    pub matched_rule_id: Option<String>,
    pub upstream_status: Option<u16>,
    pub upstream_latency_ms: Option<u64>,
    pub upstream_attempts: u32,
    pub plugin_outcomes: Vec<PluginVerdict>,
    pub response_status: Option<u16>,
    pub terminal_state: TerminalState,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl AuditRecord {
    pub fn new(correlation_id: impl Into<String>, method: &http::Method, path: &str) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            method: method.to_string(),
            path: path.to_string(),
            ..Self::default()
        }
    }
}

/// Hands records to the [`AuditSink`] off the request path.
#[derive(Clone)]
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, record: AuditRecord) {
        let sink = self.sink.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let correlation_id = record.correlation_id.clone();
                    if let Err(e) = sink.record(record).await {
                        tracing::warn!(correlation_id = %correlation_id, error = %e, "Failed to write audit record");
                    }
                });
            }
            Err(_) => {
                tracing::error!(correlation_id = %record.correlation_id, "No runtime available, audit record dropped");
            }
        }
    }
}

/// An audit record under construction. Emits exactly once.
pub struct PendingAudit {
    record: AuditRecord,
    started: Instant,
    emitter: AuditEmitter,
    completed: bool,
}

impl PendingAudit {
    pub fn new(emitter: AuditEmitter, record: AuditRecord) -> Self {
        Self {
            record,
            started: Instant::now(),
            emitter,
            completed: false,
        }
    }

    pub fn record(&mut self) -> &mut AuditRecord {
        &mut self.record
    }

    /// Finish the record in `state` and emit it.
    pub fn complete(mut self, state: TerminalState) {
        self.record.terminal_state = state;
        self.completed = true;
    }
}

impl Drop for PendingAudit {
    fn drop(&mut self) {
        if !self.completed {
            self.record.terminal_state = TerminalState::Failed;
            self.record.error = Some(CANCELLED.to_string());
        }
        let mut record = std::mem::take(&mut self.record);
        record.duration_ms = self.started.elapsed().as_millis() as u64;
        self.emitter.emit(record);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use http::Method;
    use tokio::sync::mpsc;

    use super::*;

    struct ChannelSink(mpsc::UnboundedSender<AuditRecord>);

    #[async_trait]
    impl AuditSink for ChannelSink {
        async fn record(&self, record: AuditRecord) -> eyre::Result<()> {
            self.0.send(record)?;
            Ok(())
        }
    }

    fn emitter() -> (AuditEmitter, mpsc::UnboundedReceiver<AuditRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (AuditEmitter::new(Arc::new(ChannelSink(tx))), rx)
    }

    #[tokio::test]
    async fn test_complete_emits_once() {
        let (emitter, mut rx) = emitter();
        let mut pending = PendingAudit::new(emitter, AuditRecord::new("c-1", &Method::GET, "/users"));
        pending.record().response_status = Some(200);
        pending.complete(TerminalState::Done);

        let record = rx.recv().await.unwrap();
        assert_eq!(record.correlation_id, "c-1");
        assert_eq!(record.terminal_state, TerminalState::Done);
        assert_eq!(record.response_status, Some(200));
        assert!(record.error.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_guard_records_cancellation() {
        let (emitter, mut rx) = emitter();
        let pending = PendingAudit::new(emitter, AuditRecord::new("c-2", &Method::POST, "/orders"));
        drop(pending);

        let record = rx.recv().await.unwrap();
        assert_eq!(record.terminal_state, TerminalState::Failed);
        assert_eq!(record.error.as_deref(), Some(CANCELLED));
    }

    #[test]
    fn test_record_serializes_snake_case() {
        let mut record = AuditRecord::new("c-3", &Method::GET, "/users/1");
        record.decision = Some(AuditDecision::ProxyFallbackToMock);
        record.route_decision = Some(RouteDecision::Proxy);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["decision"], "proxy_fallback_to_mock");
        assert_eq!(json["route_decision"], "proxy");
        assert_eq!(json["terminal_state"], "failed");
    }
}
