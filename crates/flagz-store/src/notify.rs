//! Channel naming and the compact notify envelope (C2).

use flagz_core::{ChangeEnvelope, EventType, FlagKey, TenantId};

pub const DEFAULT_CHANNEL: &str = "flagz_events";

/// Sanitizes a configured channel name: alphanumeric and underscore only,
/// falling back to the default on empty or whitespace-only input. Postgres
/// channel identifiers can't be parameter-bound in `LISTEN`/`NOTIFY`, so this
/// also prevents identifier injection into the `LISTEN <channel>` statement.
pub fn sanitize_channel(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return DEFAULT_CHANNEL.to_string();
    }

    let sanitized: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if sanitized.is_empty() {
        DEFAULT_CHANNEL.to_string()
    } else {
        sanitized
    }
}

/// Builds the compact envelope published on the notify channel. Never the
/// full event payload, so notifications stay fixed-size.
pub fn build_envelope(tenant_id: TenantId, flag_key: &FlagKey, event_type: EventType) -> ChangeEnvelope {
    ChangeEnvelope {
        tenant_id,
        flag_key: flag_key.clone(),
        event_type,
    }
}
