use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tokio::sync::mpsc;

use crate::{core::audit::AuditRecord, ports::AuditSink};

/// Writes each record as one structured log line on the `mirage::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        let json = serde_json::to_string(&record).wrap_err("Failed to serialize audit record")?;
        tracing::info!(
            target: "mirage::audit",
            correlation_id = %record.correlation_id,
            decision = record.decision.map_or("none", |d| d.as_str()),
            status = record.response_status,
            audit = %json,
            "request audited"
        );
        Ok(())
    }
}

/// Forwards records to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<AuditRecord>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AuditSink for ChannelAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        self.tx
            .send(record)
            .map_err(|_| eyre::eyre!("Audit channel closed"))
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_records() {
        let (sink, mut rx) = ChannelAuditSink::new();
        sink.record(AuditRecord::new("c-1", &Method::GET, "/a"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().correlation_id, "c-1");
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_channel() {
        let (sink, rx) = ChannelAuditSink::new();
        drop(rx);
        assert!(
            sink.record(AuditRecord::new("c-2", &Method::GET, "/a"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_records() {
        assert!(
            TracingAuditSink
                .record(AuditRecord::new("c-3", &Method::GET, "/a"))
                .await
                .is_ok()
        );
    }
}
