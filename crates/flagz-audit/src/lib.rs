//! Audit Sink (C7): a best-effort append sink for administrative intent.
//!
//! The write runs under a short timeout that is deliberately detached from
//! the caller's own cancellation: an HTTP client closing its connection must
//! not abort the audit write, so `record` spawns the write onto its own
//! task rather than awaiting it in the request's cancellation scope.
//! Failures are logged and swallowed, never surfaced to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::error;

use flagz_core::{AuditActor, AuditEntry, FlagKey, TenantId};
use flagz_store::FlagStore;

/// Writes must complete within this window; a write that doesn't is logged
/// and abandoned, not retried.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct AuditSink<S> {
    store: Arc<S>,
}

impl<S> AuditSink<S>
where
    S: FlagStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Records one administrative action. Returns immediately; the actual
    /// write happens on a detached task so a cancelled request context
    /// never aborts it. `details` is serialized to opaque JSON by the
    /// caller (or passed as `serde_json::json!({})` if there's nothing to
    /// record).
    pub fn record(
        &self,
        tenant_id: TenantId,
        actor: AuditActor,
        action: impl Into<String>,
        flag_key: Option<FlagKey>,
        details: JsonValue,
    ) {
        let store = self.store.clone();
        let entry = AuditEntry {
            tenant_id,
            actor,
            action: action.into(),
            flag_key,
            details,
            created_at: Utc::now(),
        };

        // Detached: no caller cancellation token is wired into this task, so
        // a client disconnect doesn't race the write. The timeout bounds how
        // long a stuck connection can hold things up; it is not a retry
        // budget.
        tokio::spawn(async move {
            match tokio::time::timeout(WRITE_TIMEOUT, store.insert_audit_log(entry.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, action = %entry.action, tenant_id = %entry.tenant_id, "audit write failed");
                }
                Err(_) => {
                    error!(action = %entry.action, tenant_id = %entry.tenant_id, "audit write timed out");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flagz_core::UserId;
    use flagz_store::InMemoryFlagStore;

    use super::*;

    #[tokio::test]
    async fn a_recorded_entry_eventually_lands_in_the_store() {
        let store = Arc::new(InMemoryFlagStore::new());
        let sink = AuditSink::new(store.clone());
        let tenant_id = TenantId::new();

        sink.record(
            tenant_id,
            AuditActor::AdminUser(UserId::new()),
            "flag_create",
            Some(FlagKey::new("dark-mode")),
            serde_json::json!({"enabled": true}),
        );

        // `record` only spawns the write; give the detached task a turn.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let entries = store.list_audit_log(tenant_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "flag_create");
    }

    #[tokio::test]
    async fn record_returns_immediately_without_waiting_for_the_write() {
        let store = Arc::new(InMemoryFlagStore::new());
        let sink = AuditSink::new(store);
        let tenant_id = TenantId::new();

        let start = std::time::Instant::now();
        sink.record(tenant_id, AuditActor::AdminUser(UserId::new()), "flag_toggle", None, serde_json::json!({}));
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
