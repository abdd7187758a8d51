//! External adapter contracts: only the interfaces matter, the
//! implementations (a database-backed registry, an append-only audit sink, a
//! metrics publication backend) are out-of-scope collaborators.

use async_trait::async_trait;

use crate::types::ExecutionToken;

/// Append-only audit sink. Record layout is unspecified; this crate only
/// needs the write contract.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, ctx: &ExecutionToken, event: &str);
}

/// A no-op audit sink, used where no collaborator is wired up.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _ctx: &ExecutionToken, _event: &str) {}
}
