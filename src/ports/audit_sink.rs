use async_trait::async_trait;
use eyre::Result;

use crate::core::audit::AuditRecord;

/// Destination for per-request audit records.
///
/// Called off the response path; a failing sink is logged and never affects the
/// client response.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<()>;
}
