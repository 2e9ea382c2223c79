//! Postgres-backed durable store.
//!
//! ## Error mapping
//!
//! | SQLx error                    | SQLSTATE | `FlagzError`     |
//! |--------------------------------|----------|-------------------|
//! | unique_violation                | `23505`  | `AlreadyExists`  |
//! | foreign_key_violation           | `23503`  | `Validation`     |
//! | check_violation                 | `23514`  | `Validation`     |
//! | anything else (connection etc.) | —        | `Transient`      |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use flagz_core::{
    AdminSession, ApiKeyId, AuditActor, AuditEntry, EventType, Flag, FlagEvent, FlagKey, FlagzError, FlagzResult,
    TenantId, UserId,
};

use crate::notify::{build_envelope, sanitize_channel};
use crate::r#trait::FlagStore;

#[derive(Debug, Clone)]
pub struct PostgresFlagStore {
    pool: PgPool,
    channel: String,
}

impl PostgresFlagStore {
    pub fn new(pool: PgPool, channel: impl AsRef<str>) -> Self {
        Self {
            pool,
            channel: sanitize_channel(channel.as_ref()),
        }
    }

    async fn notify(&self, tx: &mut Transaction<'_, Postgres>, envelope: &flagz_core::ChangeEnvelope) -> FlagzResult<()> {
        let payload = serde_json::to_string(envelope).map_err(|e| FlagzError::fatal(format!("envelope serialization: {e}")))?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(&payload)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx("notify", &e))?;

        Ok(())
    }
}

fn map_sqlx(context: &str, err: &sqlx::Error) -> FlagzError {
    if let sqlx::Error::Database(db_err) = err {
        match db_err.code().as_deref() {
            Some("23505") => return FlagzError::already_exists(context.to_string()),
            Some("23503") | Some("23514") => return FlagzError::validation(format!("{context}: {db_err}")),
            _ => {}
        }
    }
    FlagzError::transient(format!("{context}: {err}"))
}

struct FlagRow {
    tenant_id: uuid::Uuid,
    key: String,
    description: String,
    enabled: bool,
    variants: JsonValue,
    rules: JsonValue,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FlagRow> for Flag {
    fn from(row: FlagRow) -> Self {
        Flag {
            tenant_id: TenantId::from_uuid(row.tenant_id),
            key: FlagKey::new(row.key),
            description: row.description,
            enabled: row.enabled,
            variants: row.variants,
            rules: row.rules,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

async fn fetch_flag_row<'e, E>(executor: E, tenant_id: TenantId, key: &FlagKey) -> Result<Option<FlagRow>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        SELECT tenant_id, key, description, enabled, variants, rules, created_at, updated_at
        FROM flags
        WHERE tenant_id = $1 AND key = $2
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(key.as_str())
    .fetch_optional(executor)
    .await?;

    row.map(|row| {
        Ok(FlagRow {
            tenant_id: row.try_get("tenant_id")?,
            key: row.try_get("key")?,
            description: row.try_get("description")?,
            enabled: row.try_get("enabled")?,
            variants: row.try_get("variants")?,
            rules: row.try_get("rules")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    })
    .transpose()
}

async fn append_event(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    key: &FlagKey,
    event_type: EventType,
    payload: &JsonValue,
) -> FlagzResult<()> {
    sqlx::query(
        r#"
        INSERT INTO flag_events (tenant_id, flag_key, event_type, payload)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(key.as_str())
    .bind(event_type.as_str())
    .bind(payload)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx("append_event", &e))?;

    Ok(())
}

#[async_trait]
impl FlagStore for PostgresFlagStore {
    #[instrument(skip(self, variants, rules), fields(tenant = %tenant_id, key = %key), err)]
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

        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx("begin", &e))?;

        sqlx::query(
            r#"
            INSERT INTO flags (tenant_id, key, description, enabled, variants, rules)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(key.as_str())
        .bind(&description)
        .bind(enabled)
        .bind(&variants)
        .bind(&rules)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx(&format!("create_flag({key})"), &e))?;

        let flag = fetch_flag_row(&mut *tx, tenant_id, &key)
            .await
            .map_err(|e| map_sqlx("create_flag:reload", &e))?
            .ok_or_else(|| FlagzError::fatal("inserted flag row vanished before reload"))?;
        let flag: Flag = flag.into();

        append_event(
            &mut tx,
            tenant_id,
            &key,
            EventType::Created,
            &serde_json::to_value(&flag).map_err(|e| FlagzError::fatal(e.to_string()))?,
        )
        .await?;

        self.notify(&mut tx, &build_envelope(tenant_id, &key, EventType::Created)).await?;

        tx.commit().await.map_err(|e| map_sqlx("commit", &e))?;

        Ok(flag)
    }

    #[instrument(skip(self, variants, rules), fields(tenant = %tenant_id, key = %key), err)]
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

        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx("begin", &e))?;

        let result = sqlx::query(
            r#"
            UPDATE flags
            SET description = $3, enabled = $4, variants = $5, rules = $6, updated_at = now()
            WHERE tenant_id = $1 AND key = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(key.as_str())
        .bind(&description)
        .bind(enabled)
        .bind(&variants)
        .bind(&rules)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx(&format!("update_flag({key})"), &e))?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(|e| map_sqlx("rollback", &e))?;
            return Err(FlagzError::NotFound);
        }

        let flag = fetch_flag_row(&mut *tx, tenant_id, &key)
            .await
            .map_err(|e| map_sqlx("update_flag:reload", &e))?
            .ok_or(FlagzError::NotFound)?;
        let flag: Flag = flag.into();

        append_event(
            &mut tx,
            tenant_id,
            &key,
            EventType::Updated,
            &serde_json::to_value(&flag).map_err(|e| FlagzError::fatal(e.to_string()))?,
        )
        .await?;

        self.notify(&mut tx, &build_envelope(tenant_id, &key, EventType::Updated)).await?;

        tx.commit().await.map_err(|e| map_sqlx("commit", &e))?;

        Ok(flag)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, key = %key), err)]
    async fn delete_flag(&self, tenant_id: TenantId, key: &FlagKey) -> FlagzResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx("begin", &e))?;

        let result = sqlx::query("DELETE FROM flags WHERE tenant_id = $1 AND key = $2")
            .bind(tenant_id.as_uuid())
            .bind(key.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx(&format!("delete_flag({key})"), &e))?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(|e| map_sqlx("rollback", &e))?;
            return Err(FlagzError::NotFound);
        }

        append_event(&mut tx, tenant_id, key, EventType::Deleted, &serde_json::json!({})).await?;

        self.notify(&mut tx, &build_envelope(tenant_id, key, EventType::Deleted)).await?;

        tx.commit().await.map_err(|e| map_sqlx("commit", &e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, key = %key))]
    async fn get_flag(&self, tenant_id: TenantId, key: &FlagKey) -> FlagzResult<Flag> {
        fetch_flag_row(&self.pool, tenant_id, key)
            .await
            .map_err(|e| map_sqlx("get_flag", &e))?
            .map(Into::into)
            .ok_or(FlagzError::NotFound)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id))]
    async fn list_flags(&self, tenant_id: TenantId) -> FlagzResult<Vec<Flag>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, key, description, enabled, variants, rules, created_at, updated_at
            FROM flags
            WHERE tenant_id = $1
            ORDER BY key ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list_flags", &e))?;

        let mut flags = Vec::with_capacity(rows.len());
        for row in rows {
            flags.push(
                Flag::from(FlagRow {
                    tenant_id: row.try_get("tenant_id").map_err(|e| FlagzError::fatal(e.to_string()))?,
                    key: row.try_get("key").map_err(|e| FlagzError::fatal(e.to_string()))?,
                    description: row.try_get("description").map_err(|e| FlagzError::fatal(e.to_string()))?,
                    enabled: row.try_get("enabled").map_err(|e| FlagzError::fatal(e.to_string()))?,
                    variants: row.try_get("variants").map_err(|e| FlagzError::fatal(e.to_string()))?,
                    rules: row.try_get("rules").map_err(|e| FlagzError::fatal(e.to_string()))?,
                    created_at: row.try_get("created_at").map_err(|e| FlagzError::fatal(e.to_string()))?,
                    updated_at: row.try_get("updated_at").map_err(|e| FlagzError::fatal(e.to_string()))?,
                }),
            );
        }
        Ok(flags)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, after_id))]
    async fn list_events_since(
        &self,
        tenant_id: TenantId,
        after_id: i64,
        flag_key: Option<&FlagKey>,
    ) -> FlagzResult<Vec<FlagEvent>> {
        let key_filter: Option<&str> = flag_key.map(|k| k.as_str());

        let rows = sqlx::query(
            r#"
            SELECT event_id, tenant_id, flag_key, event_type, payload, created_at
            FROM flag_events
            WHERE tenant_id = $1
              AND event_id > $2
              AND ($3::text IS NULL OR flag_key = $3)
            ORDER BY event_id ASC
            LIMIT 1000
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(after_id)
        .bind(key_filter)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list_events_since", &e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let event_type_str: String = row.try_get("event_type").map_err(|e| FlagzError::fatal(e.to_string()))?;
            let event_type = match event_type_str.as_str() {
                "created" => EventType::Created,
                "updated" => EventType::Updated,
                "deleted" => EventType::Deleted,
                other => return Err(FlagzError::fatal(format!("unknown event_type in storage: {other}"))),
            };

            events.push(FlagEvent {
                event_id: row.try_get::<i64, _>("event_id").map_err(|e| FlagzError::fatal(e.to_string()))?.into(),
                tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(|e| FlagzError::fatal(e.to_string()))?),
                flag_key: FlagKey::new(row.try_get::<String, _>("flag_key").map_err(|e| FlagzError::fatal(e.to_string()))?),
                event_type,
                payload: row.try_get("payload").map_err(|e| FlagzError::fatal(e.to_string()))?,
                created_at: row.try_get("created_at").map_err(|e| FlagzError::fatal(e.to_string()))?,
            });
        }
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn validate_api_key(&self, key_id: ApiKeyId) -> FlagzResult<(String, TenantId)> {
        let row = sqlx::query("SELECT secret_hash, tenant_id FROM api_keys WHERE id = $1 AND revoked_at IS NULL")
            .bind(key_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("validate_api_key", &e))?;

        let row = row.ok_or(FlagzError::NotFound)?;
        let secret_hash: String = row.try_get("secret_hash").map_err(|e| FlagzError::fatal(e.to_string()))?;
        let tenant_id: uuid::Uuid = row.try_get("tenant_id").map_err(|e| FlagzError::fatal(e.to_string()))?;
        Ok((secret_hash, TenantId::from_uuid(tenant_id)))
    }

    #[instrument(skip(self, session))]
    async fn create_admin_session(&self, session: AdminSession) -> FlagzResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_sessions (token_hash, user_id, anti_forgery_token, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&session.token_hash)
        .bind(session.user_id.as_uuid())
        .bind(&session.anti_forgery_token)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("create_admin_session", &e))?;
        Ok(())
    }

    #[instrument(skip(self, token_hash))]
    async fn get_admin_session(&self, token_hash: &str, now: DateTime<Utc>) -> FlagzResult<AdminSession> {
        let row = sqlx::query(
            r#"
            SELECT token_hash, user_id, anti_forgery_token, created_at, expires_at
            FROM admin_sessions
            WHERE token_hash = $1 AND expires_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("get_admin_session", &e))?;

        let row = row.ok_or(FlagzError::NotFound)?;
        Ok(AdminSession {
            token_hash: row.try_get("token_hash").map_err(|e| FlagzError::fatal(e.to_string()))?,
            user_id: UserId::from_uuid(row.try_get("user_id").map_err(|e| FlagzError::fatal(e.to_string()))?),
            anti_forgery_token: row.try_get("anti_forgery_token").map_err(|e| FlagzError::fatal(e.to_string()))?,
            created_at: row.try_get("created_at").map_err(|e| FlagzError::fatal(e.to_string()))?,
            expires_at: row.try_get("expires_at").map_err(|e| FlagzError::fatal(e.to_string()))?,
        })
    }

    #[instrument(skip(self, token_hash))]
    async fn delete_admin_session(&self, token_hash: &str) -> FlagzResult<()> {
        sqlx::query("DELETE FROM admin_sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("delete_admin_session", &e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_expired_admin_sessions(&self, now: DateTime<Utc>) -> FlagzResult<u64> {
        let result = sqlx::query("DELETE FROM admin_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("delete_expired_admin_sessions", &e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, entry))]
    async fn insert_audit_log(&self, entry: AuditEntry) -> FlagzResult<()> {
        let (actor_kind, actor_id) = match entry.actor {
            AuditActor::AdminUser(id) => ("admin_user", *id.as_uuid()),
            AuditActor::ApiKey(id) => ("api_key", *id.as_uuid()),
        };

        sqlx::query(
            r#"
            INSERT INTO audit_log (tenant_id, actor_kind, actor_id, action, flag_key, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.tenant_id.as_uuid())
        .bind(actor_kind)
        .bind(actor_id)
        .bind(&entry.action)
        .bind(entry.flag_key.as_ref().map(|k| k.as_str()))
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("insert_audit_log", &e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(tenant = %tenant_id))]
    async fn list_audit_log(&self, tenant_id: TenantId) -> FlagzResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, actor_kind, actor_id, action, flag_key, details, created_at
            FROM audit_log
            WHERE tenant_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("list_audit_log", &e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let actor_kind: String = row.try_get("actor_kind").map_err(|e| FlagzError::fatal(e.to_string()))?;
            let actor_id: uuid::Uuid = row.try_get("actor_id").map_err(|e| FlagzError::fatal(e.to_string()))?;
            let actor = match actor_kind.as_str() {
                "admin_user" => AuditActor::AdminUser(UserId::from_uuid(actor_id)),
                "api_key" => AuditActor::ApiKey(ApiKeyId::from_uuid(actor_id)),
                other => return Err(FlagzError::fatal(format!("unknown actor_kind in storage: {other}"))),
            };
            let flag_key: Option<String> = row.try_get("flag_key").map_err(|e| FlagzError::fatal(e.to_string()))?;

            entries.push(AuditEntry {
                tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(|e| FlagzError::fatal(e.to_string()))?),
                actor,
                action: row.try_get("action").map_err(|e| FlagzError::fatal(e.to_string()))?,
                flag_key: flag_key.map(FlagKey::new),
                details: row.try_get("details").map_err(|e| FlagzError::fatal(e.to_string()))?,
                created_at: row.try_get("created_at").map_err(|e| FlagzError::fatal(e.to_string()))?,
            });
        }
        Ok(entries)
    }
}
