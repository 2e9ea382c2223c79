//! Durable store contract (C1) and the event-log operations that share its
//! transactions (C2).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use flagz_core::{AdminSession, ApiKeyId, Flag, FlagEvent, FlagKey, FlagzResult, TenantId};

/// Sole authoritative copy of tenants, flags, API keys, events, audit
/// entries and sessions.
///
/// `create_flag`/`update_flag`/`delete_flag` each append their event and
/// emit the out-of-process notify inside the same transaction: callers never
/// see a flag mutation without its event, or an event without its notify.
#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn create_flag(
        &self,
        tenant_id: TenantId,
        key: FlagKey,
        description: String,
        enabled: bool,
        variants: Option<JsonValue>,
        rules: Option<JsonValue>,
    ) -> FlagzResult<Flag>;

    async fn update_flag(
        &self,
        tenant_id: TenantId,
        key: FlagKey,
        description: String,
        enabled: bool,
        variants: Option<JsonValue>,
        rules: Option<JsonValue>,
    ) -> FlagzResult<Flag>;

    async fn delete_flag(&self, tenant_id: TenantId, key: &FlagKey) -> FlagzResult<()>;

    async fn get_flag(&self, tenant_id: TenantId, key: &FlagKey) -> FlagzResult<Flag>;

    async fn list_flags(&self, tenant_id: TenantId) -> FlagzResult<Vec<Flag>>;

    /// Returns events with `event_id > after_id` ordered ascending, optionally
    /// filtered to a single flag key, bounded at 1000 rows.
    async fn list_events_since(
        &self,
        tenant_id: TenantId,
        after_id: i64,
        flag_key: Option<&FlagKey>,
    ) -> FlagzResult<Vec<FlagEvent>>;

    /// Looks up the stored secret hash and owning tenant for a key id.
    /// `NotFound` covers both "absent" and "revoked".
    async fn validate_api_key(&self, key_id: ApiKeyId) -> FlagzResult<(String, TenantId)>;

    async fn create_admin_session(&self, session: AdminSession) -> FlagzResult<()>;

    /// Also filters by expiry: an expired session is reported as `NotFound`.
    async fn get_admin_session(&self, token_hash: &str, now: DateTime<Utc>) -> FlagzResult<AdminSession>;

    async fn delete_admin_session(&self, token_hash: &str) -> FlagzResult<()>;

    /// Returns the number of sessions purged.
    async fn delete_expired_admin_sessions(&self, now: DateTime<Utc>) -> FlagzResult<u64>;

    /// Best-effort append; errors are surfaced but not retried here.
    async fn insert_audit_log(&self, entry: flagz_core::AuditEntry) -> FlagzResult<()>;

    /// Reads back everything appended for a tenant, in append order. The
    /// admin portal's audit-log view is the only caller; unlike the event
    /// log, nothing resumes a watermark against this, so there's no
    /// ordering contract beyond "append order".
    async fn list_audit_log(&self, tenant_id: TenantId) -> FlagzResult<Vec<flagz_core::AuditEntry>>;
}
