//! In-memory store for unit tests and local dev, mirroring the Postgres
//! implementation's contract (including the atomic mutate+event+notify step,
//! modulo an actual out-of-process notify).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use flagz_core::{
    AdminSession, ApiKey, ApiKeyId, AuditEntry, EventType, Flag, FlagEvent, FlagKey, FlagzError, FlagzResult, TenantId,
};

use crate::r#trait::FlagStore;

#[derive(Default)]
struct State {
    flags: HashMap<(TenantId, FlagKey), Flag>,
    events: Vec<FlagEvent>,
    next_event_id: i64,
    api_keys: HashMap<ApiKeyId, ApiKey>,
    admin_sessions: HashMap<String, AdminSession>,
    audit_log: Vec<AuditEntry>,
}

/// In-memory `FlagStore`. Single global mutex; fine for tests, wrong for a
/// production deployment with concurrent tenants of any size.
#[derive(Default)]
pub struct InMemoryFlagStore {
    state: Mutex<State>,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/dev seam: register an API key directly without going through an
    /// admin-only HTTP route.
    pub fn seed_api_key(&self, id: ApiKeyId, tenant_id: TenantId, secret_hash: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        state.api_keys.insert(
            id,
            ApiKey {
                id,
                tenant_id,
                secret_hash: secret_hash.into(),
                created_at: now,
                revoked_at: None,
            },
        );
    }

    /// Admin-portal seam: issues a new API key. Kept on the concrete type
    /// rather than `FlagStore` because key issuance/revocation is admin CRUD
    /// (out of this core's contract per the spec), not part of C1's own
    /// operation list.
    pub fn create_api_key(&self, tenant_id: TenantId, id: ApiKeyId, secret_hash: impl Into<String>) -> ApiKey {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let key = ApiKey {
            id,
            tenant_id,
            secret_hash: secret_hash.into(),
            created_at: now,
            revoked_at: None,
        };
        state.api_keys.insert(id, key.clone());
        key
    }

    /// Marks an API key revoked. `NotFound` if absent, owned by another
    /// tenant, or already revoked (revocation is a one-way transition).
    pub fn revoke_api_key(&self, tenant_id: TenantId, id: ApiKeyId) -> FlagzResult<()> {
        let mut state = self.state.lock().unwrap();
        let key = state.api_keys.get_mut(&id).ok_or(FlagzError::NotFound)?;
        if key.tenant_id != tenant_id || key.revoked_at.is_some() {
            return Err(FlagzError::NotFound);
        }
        key.revoked_at = Some(Utc::now());
        Ok(())
    }

    /// Lists every API key (active or revoked) for a tenant, newest first.
    pub fn list_api_keys(&self, tenant_id: TenantId) -> Vec<ApiKey> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<ApiKey> = state.api_keys.values().filter(|k| k.tenant_id == tenant_id).cloned().collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        keys
    }

    fn append_event(state: &mut State, tenant_id: TenantId, key: &FlagKey, event_type: EventType, payload: JsonValue) -> FlagEvent {
        state.next_event_id += 1;
        let event = FlagEvent {
            event_id: state.next_event_id.into(),
            tenant_id,
            flag_key: key.clone(),
            event_type,
            payload,
            created_at: Utc::now(),
        };
        state.events.push(event.clone());
        event
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn create_flag(
        &self,
        tenant_id: TenantId,
        key: FlagKey,
        description: String,
        enabled: bool,
        variants: Option<JsonValue>,
        rules: Option<JsonValue>,
    ) -> FlagzResult<Flag> {
        let (variants, rules) = Flag::normalize_json(variants, rules);
        let mut state = self.state.lock().unwrap();

        if state.flags.contains_key(&(tenant_id, key.clone())) {
            return Err(FlagzError::already_exists(key.to_string()));
        }

        let now = Utc::now();
        let flag = Flag {
            tenant_id,
            key: key.clone(),
            description,
            enabled,
            variants,
            rules,
            created_at: now,
            updated_at: now,
        };
        state.flags.insert((tenant_id, key.clone()), flag.clone());
        let payload = serde_json::to_value(&flag).unwrap();
        Self::append_event(&mut state, tenant_id, &key, EventType::Created, payload);

        Ok(flag)
    }

    async fn update_flag(
        &self,
        tenant_id: TenantId,
        key: FlagKey,
        description: String,
        enabled: bool,
        variants: Option<JsonValue>,
        rules: Option<JsonValue>,
    ) -> FlagzResult<Flag> {
        let (variants, rules) = Flag::normalize_json(variants, rules);
        let mut state = self.state.lock().unwrap();

        let existing = state.flags.get(&(tenant_id, key.clone())).cloned().ok_or(FlagzError::NotFound)?;

        let flag = Flag {
            description,
            enabled,
            variants,
            rules,
            updated_at: Utc::now(),
            ..existing
        };
        state.flags.insert((tenant_id, key.clone()), flag.clone());
        let payload = serde_json::to_value(&flag).unwrap();
        Self::append_event(&mut state, tenant_id, &key, EventType::Updated, payload);

        Ok(flag)
    }

    async fn delete_flag(&self, tenant_id: TenantId, key: &FlagKey) -> FlagzResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.flags.remove(&(tenant_id, key.clone())).is_none() {
            return Err(FlagzError::NotFound);
        }
        Self::append_event(&mut state, tenant_id, key, EventType::Deleted, serde_json::json!({}));
        Ok(())
    }

    async fn get_flag(&self, tenant_id: TenantId, key: &FlagKey) -> FlagzResult<Flag> {
        let state = self.state.lock().unwrap();
        state.flags.get(&(tenant_id, key.clone())).cloned().ok_or(FlagzError::NotFound)
    }

    async fn list_flags(&self, tenant_id: TenantId) -> FlagzResult<Vec<Flag>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .flags
            .iter()
            .filter(|((t, _), _)| *t == tenant_id)
            .map(|(_, flag)| flag.clone())
            .collect())
    }

    async fn list_events_since(
        &self,
        tenant_id: TenantId,
        after_id: i64,
        flag_key: Option<&FlagKey>,
    ) -> FlagzResult<Vec<FlagEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.event_id.value() > after_id)
            .filter(|e| flag_key.is_none_or(|k| &e.flag_key == k))
            .take(1000)
            .cloned()
            .collect())
    }

    async fn validate_api_key(&self, key_id: ApiKeyId) -> FlagzResult<(String, TenantId)> {
        let state = self.state.lock().unwrap();
        let key = state.api_keys.get(&key_id).ok_or(FlagzError::NotFound)?;
        if !key.is_active() {
            return Err(FlagzError::NotFound);
        }
        Ok((key.secret_hash.clone(), key.tenant_id))
    }

    async fn create_admin_session(&self, session: AdminSession) -> FlagzResult<()> {
        let mut state = self.state.lock().unwrap();
        state.admin_sessions.insert(session.token_hash.clone(), session);
        Ok(())
    }

    async fn get_admin_session(&self, token_hash: &str, now: DateTime<Utc>) -> FlagzResult<AdminSession> {
        let state = self.state.lock().unwrap();
        let session = state.admin_sessions.get(token_hash).ok_or(FlagzError::NotFound)?;
        if session.is_expired(now) {
            return Err(FlagzError::NotFound);
        }
        Ok(session.clone())
    }

    async fn delete_admin_session(&self, token_hash: &str) -> FlagzResult<()> {
        let mut state = self.state.lock().unwrap();
        state.admin_sessions.remove(token_hash);
        Ok(())
    }

    async fn delete_expired_admin_sessions(&self, now: DateTime<Utc>) -> FlagzResult<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.admin_sessions.len();
        state.admin_sessions.retain(|_, session| !session.is_expired(now));
        Ok((before - state.admin_sessions.len()) as u64)
    }

    async fn insert_audit_log(&self, entry: AuditEntry) -> FlagzResult<()> {
        let mut state = self.state.lock().unwrap();
        state.audit_log.push(entry);
        Ok(())
    }

    async fn list_audit_log(&self, tenant_id: TenantId) -> FlagzResult<Vec<AuditEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state.audit_log.iter().filter(|e| e.tenant_id == tenant_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new()
    }

    #[tokio::test]
    async fn create_then_delete_leaves_store_empty() {
        let store = InMemoryFlagStore::new();
        let t = tenant();
        let key = FlagKey::new("dark-mode");

        store.create_flag(t, key.clone(), "d".into(), true, None, None).await.unwrap();
        store.delete_flag(t, &key).await.unwrap();

        assert!(matches!(store.get_flag(t, &key).await, Err(FlagzError::NotFound)));
    }

    #[tokio::test]
    async fn create_is_rejected_on_duplicate_key() {
        let store = InMemoryFlagStore::new();
        let t = tenant();
        let key = FlagKey::new("dark-mode");

        store.create_flag(t, key.clone(), "d".into(), true, None, None).await.unwrap();
        let err = store.create_flag(t, key, "d".into(), true, None, None).await.unwrap_err();
        assert!(matches!(err, FlagzError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_missing_flag_is_not_found() {
        let store = InMemoryFlagStore::new();
        let err = store
            .update_flag(tenant(), FlagKey::new("nope"), "d".into(), true, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FlagzError::NotFound));
    }

    #[tokio::test]
    async fn each_mutation_produces_exactly_one_ordered_event() {
        let store = InMemoryFlagStore::new();
        let t = tenant();
        let key = FlagKey::new("dark-mode");

        store.create_flag(t, key.clone(), "d".into(), true, None, None).await.unwrap();
        store.update_flag(t, key.clone(), "d".into(), false, None, None).await.unwrap();

        let events = store.list_events_since(t, 0, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].event_id < events[1].event_id);
        assert_eq!(events[0].event_type, EventType::Created);
        assert_eq!(events[1].event_type, EventType::Updated);
    }

    #[tokio::test]
    async fn list_events_since_caps_at_1000() {
        let store = InMemoryFlagStore::new();
        let t = tenant();
        for i in 0..1500 {
            let key = FlagKey::new(format!("flag-{i}"));
            store.create_flag(t, key, "d".into(), true, None, None).await.unwrap();
        }
        let events = store.list_events_since(t, 0, None).await.unwrap();
        assert_eq!(events.len(), 1000);
    }

    #[tokio::test]
    async fn list_events_since_max_id_returns_empty() {
        let store = InMemoryFlagStore::new();
        let t = tenant();
        store.create_flag(t, FlagKey::new("a"), "d".into(), true, None, None).await.unwrap();
        let all = store.list_events_since(t, 0, None).await.unwrap();
        let max_id = all.last().unwrap().event_id.value();
        let empty = store.list_events_since(t, max_id, None).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn revoked_api_key_is_not_found() {
        let store = InMemoryFlagStore::new();
        let t = tenant();
        let key_id = ApiKeyId::new();
        store.seed_api_key(key_id, t, "hash");
        assert!(store.validate_api_key(key_id).await.is_ok());

        {
            let mut state = store.state.lock().unwrap();
            state.api_keys.get_mut(&key_id).unwrap().revoked_at = Some(Utc::now());
        }
        assert!(matches!(store.validate_api_key(key_id).await, Err(FlagzError::NotFound)));
    }

    #[tokio::test]
    async fn create_api_key_is_immediately_valid_and_revocation_does_not_return() {
        let store = InMemoryFlagStore::new();
        let t = tenant();
        let key_id = ApiKeyId::new();

        store.create_api_key(t, key_id, "hash");
        assert!(store.validate_api_key(key_id).await.is_ok());

        store.revoke_api_key(t, key_id).unwrap();
        assert!(matches!(store.validate_api_key(key_id).await, Err(FlagzError::NotFound)));
        assert!(matches!(store.revoke_api_key(t, key_id), Err(FlagzError::NotFound)));
    }

    #[tokio::test]
    async fn list_api_keys_is_scoped_to_tenant() {
        let store = InMemoryFlagStore::new();
        let t1 = tenant();
        let t2 = tenant();
        store.create_api_key(t1, ApiKeyId::new(), "h1");
        store.create_api_key(t2, ApiKeyId::new(), "h2");

        assert_eq!(store.list_api_keys(t1).len(), 1);
        assert_eq!(store.list_api_keys(t2).len(), 1);
    }

    #[tokio::test]
    async fn list_audit_log_is_scoped_to_tenant() {
        use flagz_core::AuditActor;

        let store = InMemoryFlagStore::new();
        let t1 = tenant();
        let t2 = tenant();
        let now = Utc::now();

        store
            .insert_audit_log(AuditEntry {
                tenant_id: t1,
                actor: AuditActor::AdminUser(flagz_core::UserId::new()),
                action: "flag_create".to_string(),
                flag_key: Some(FlagKey::new("a")),
                details: serde_json::json!({}),
                created_at: now,
            })
            .await
            .unwrap();
        store
            .insert_audit_log(AuditEntry {
                tenant_id: t2,
                actor: AuditActor::AdminUser(flagz_core::UserId::new()),
                action: "flag_create".to_string(),
                flag_key: Some(FlagKey::new("b")),
                details: serde_json::json!({}),
                created_at: now,
            })
            .await
            .unwrap();

        let entries = store.list_audit_log(t1).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tenant_id, t1);
    }
}
