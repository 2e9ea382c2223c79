//! Request/response DTOs for the admin and client HTTP surfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use flagz_core::{Flag, FlagEvent};

// -------------------------
// Admin portal request DTOs (form posts)
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SetupForm {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectForm {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFlagForm {
    pub key: String,
    #[serde(default)]
    pub description: String,
    /// HTML checkboxes only appear in the form body when checked; absence
    /// means "off", not "omitted".
    #[serde(default)]
    pub enabled: Option<String>,
    /// Raw JSON text from a textarea; `None`/empty normalizes to `{}`/`[]`
    /// by `Flag::normalize_json`.
    #[serde(default)]
    pub variants: Option<String>,
    #[serde(default)]
    pub rules: Option<String>,
}

impl CreateFlagForm {
    pub fn enabled(&self) -> bool {
        self.enabled.as_deref() == Some("on")
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteApiKeyForm {
    pub key_id: String,
}

// -------------------------
// Client/admin response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct FlagDto {
    pub key: String,
    pub description: String,
    pub enabled: bool,
    pub variants: JsonValue,
    pub rules: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Flag> for FlagDto {
    fn from(flag: Flag) -> Self {
        Self {
            key: flag.key.to_string(),
            description: flag.description,
            enabled: flag.enabled,
            variants: flag.variants,
            rules: flag.rules,
            created_at: flag.created_at,
            updated_at: flag.updated_at,
        }
    }
}

impl From<flagz_cache::FlagSnapshot> for FlagDto {
    fn from(flag: flagz_cache::FlagSnapshot) -> Self {
        Self {
            key: flag.key.to_string(),
            description: flag.description,
            enabled: flag.enabled,
            variants: flag.variants,
            rules: flag.rules,
            created_at: flag.created_at,
            updated_at: flag.updated_at,
        }
    }
}

/// Stream payload: the event envelope plus the full payload JSON, per §6.
#[derive(Debug, Serialize)]
pub struct EventDto {
    pub event_id: i64,
    pub tenant_id: String,
    pub flag_key: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl From<FlagEvent> for EventDto {
    fn from(event: FlagEvent) -> Self {
        Self {
            event_id: event.event_id.value(),
            tenant_id: event.tenant_id.to_string(),
            flag_key: event.flag_key.to_string(),
            event_type: event.event_type.as_str().to_string(),
            payload: event.payload,
            created_at: event.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub after_event_id: Option<i64>,
    pub flag_key: Option<String>,
}
