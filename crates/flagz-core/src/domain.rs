//! Domain entities shared by the store, cache, fan-out and gate: the shapes
//! every other crate agrees on, with no storage or transport assumptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entity::Entity;
use crate::id::{ApiKeyId, EventId, FlagKey, TenantId, UserId};

/// A tenant (project): the scoping dimension for all other entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Tenant {
    type Id = TenantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A feature flag. Composite identity `(tenant, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub tenant_id: TenantId,
    pub key: FlagKey,
    pub description: String,
    pub enabled: bool,
    /// Opaque mapping from variant name to payload. Empty input is stored as `{}`.
    pub variants: JsonValue,
    /// Opaque ordered sequence of targeting rules. Empty input is stored as `[]`.
    pub rules: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flag {
    /// Substitutes the default JSON literals for empty caller input, so
    /// downstream evaluators always see well-formed JSON. `{}` for variants
    /// (an object), `[]` for rules (an array).
    pub fn normalize_json(variants: Option<JsonValue>, rules: Option<JsonValue>) -> (JsonValue, JsonValue) {
        let variants = match variants {
            Some(v) if !is_empty_json(&v) => v,
            _ => JsonValue::Object(Default::default()),
        };
        let rules = match rules {
            Some(v) if !is_empty_json(&v) => v,
            _ => JsonValue::Array(Default::default()),
        };
        (variants, rules)
    }
}

fn is_empty_json(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Array(arr) => arr.is_empty(),
        _ => false,
    }
}

/// The kind of mutation an event records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single immutable entry in the monotonic event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagEvent {
    pub event_id: EventId,
    pub tenant_id: TenantId,
    pub flag_key: FlagKey,
    pub event_type: EventType,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// The compact envelope carried on the out-of-band notify channel. Never the
/// full payload; consumers re-read from the store on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    pub tenant_id: TenantId,
    pub flag_key: FlagKey,
    pub event_type: EventType,
}

/// An API key record. The secret is never held in plaintext past issuance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub tenant_id: TenantId,
    /// Password-style hash of the secret half of the bearer token.
    pub secret_hash: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// A key with a non-null revocation timestamp is treated as absent.
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// An admin login session. Persisted under the MAC'd hash of the token the
/// client actually holds; the plaintext token is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminSession {
    pub token_hash: String,
    pub user_id: UserId,
    pub anti_forgery_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AdminSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A best-effort record of administrative intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant_id: TenantId,
    pub actor: AuditActor,
    pub action: String,
    pub flag_key: Option<FlagKey>,
    pub details: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// At least one of these is always set: either an admin user or an API key
/// performed the action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditActor {
    AdminUser(UserId),
    ApiKey(ApiKeyId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_json_defaults_empty_input() {
        let (variants, rules) = Flag::normalize_json(None, None);
        assert_eq!(variants, serde_json::json!({}));
        assert_eq!(rules, serde_json::json!([]));
    }

    #[test]
    fn normalize_json_keeps_non_empty_input() {
        let (variants, rules) = Flag::normalize_json(
            Some(serde_json::json!({"a": 1})),
            Some(serde_json::json!([{"rule": "x"}])),
        );
        assert_eq!(variants, serde_json::json!({"a": 1}));
        assert_eq!(rules, serde_json::json!([{"rule": "x"}]));
    }

    #[test]
    fn api_key_revoked_is_not_active() {
        let mut key = ApiKey {
            id: ApiKeyId::new(),
            tenant_id: TenantId::new(),
            secret_hash: "hash".to_string(),
            created_at: Utc::now(),
            revoked_at: None,
        };
        assert!(key.is_active());
        key.revoked_at = Some(Utc::now());
        assert!(!key.is_active());
    }
}
