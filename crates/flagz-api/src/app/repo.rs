//! Admin CRUD: tenants, admin users, and API-key issuance/listing/revocation.
//!
//! Deliberately not part of `flagz_store::FlagStore` — §4.1's contract only
//! lists `ValidateAPIKey`, not create/revoke/list, since key issuance and
//! tenant/user management are admin CRUD (an out-of-scope, interfaces-only
//! concern for the core). `AdminRepo` is this crate's own seam for it, with
//! one implementation per `FlagStore` backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use flagz_core::{ApiKey, ApiKeyId, FlagzError, FlagzResult, Tenant, TenantId, UserId};
use flagz_store::InMemoryFlagStore;

/// The bootstrap/system tenant audit entries are filed under before any real
/// project exists (e.g. `admin_setup`). Fixed rather than generated so
/// deployments and tests can refer to it as a constant.
pub const SYSTEM_TENANT_ID: &str = "11111111-1111-1111-1111-111111111111";

#[async_trait]
pub trait AdminRepo: Send + Sync {
    async fn create_tenant(&self, name: String, description: String) -> FlagzResult<Tenant>;
    async fn get_tenant(&self, id: TenantId) -> FlagzResult<Tenant>;
    async fn list_tenants(&self) -> FlagzResult<Vec<Tenant>>;

    /// Idempotently creates the fixed system tenant `admin_setup` files its
    /// audit entry under, returning its id either way.
    async fn ensure_system_tenant(&self) -> FlagzResult<TenantId>;

    async fn any_admin_user_exists(&self) -> FlagzResult<bool>;
    async fn create_admin_user(&self, username: String, password_hash: String) -> FlagzResult<UserId>;
    /// Returns `(user_id, password_hash)`. `NotFound` covers "no such username".
    async fn find_admin_user_by_username(&self, username: &str) -> FlagzResult<(UserId, String)>;

    async fn create_api_key(&self, tenant_id: TenantId, id: ApiKeyId, secret_hash: String) -> FlagzResult<ApiKey>;
    async fn list_api_keys(&self, tenant_id: TenantId) -> FlagzResult<Vec<ApiKey>>;
    async fn revoke_api_key(&self, tenant_id: TenantId, id: ApiKeyId) -> FlagzResult<()>;
}

fn system_tenant_id() -> TenantId {
    SYSTEM_TENANT_ID.parse().expect("SYSTEM_TENANT_ID is a valid UUID literal")
}

// ---------------------------------------------------------------------
// In-memory backend: dev/test wiring, sharing its API-key bookkeeping with
// `InMemoryFlagStore` so `validate_api_key` sees keys this repo issues.
// ---------------------------------------------------------------------

#[derive(Default)]
struct MemState {
    tenants: HashMap<TenantId, Tenant>,
    // username -> (user_id, password_hash)
    admin_users: HashMap<String, (UserId, String)>,
}

pub struct InMemoryAdminRepo {
    store: Arc<InMemoryFlagStore>,
    state: Mutex<MemState>,
}

impl InMemoryAdminRepo {
    pub fn new(store: Arc<InMemoryFlagStore>) -> Self {
        Self { store, state: Mutex::new(MemState::default()) }
    }
}

#[async_trait]
impl AdminRepo for InMemoryAdminRepo {
    async fn create_tenant(&self, name: String, description: String) -> FlagzResult<Tenant> {
        let mut state = self.state.lock().unwrap();
        let id = TenantId::new();
        let now = Utc::now();
        let tenant = Tenant { id, name, description, created_at: now, updated_at: now };
        state.tenants.insert(id, tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, id: TenantId) -> FlagzResult<Tenant> {
        self.state.lock().unwrap().tenants.get(&id).cloned().ok_or(FlagzError::NotFound)
    }

    async fn list_tenants(&self) -> FlagzResult<Vec<Tenant>> {
        Ok(self.state.lock().unwrap().tenants.values().cloned().collect())
    }

    async fn ensure_system_tenant(&self) -> FlagzResult<TenantId> {
        let id = system_tenant_id();
        let mut state = self.state.lock().unwrap();
        state.tenants.entry(id).or_insert_with(|| {
            let now = Utc::now();
            Tenant { id, name: "system".to_string(), description: "bootstrap/system entries".to_string(), created_at: now, updated_at: now }
        });
        Ok(id)
    }

    async fn any_admin_user_exists(&self) -> FlagzResult<bool> {
        Ok(!self.state.lock().unwrap().admin_users.is_empty())
    }

    async fn create_admin_user(&self, username: String, password_hash: String) -> FlagzResult<UserId> {
        let mut state = self.state.lock().unwrap();
        if state.admin_users.contains_key(&username) {
            return Err(FlagzError::already_exists(username));
        }
        let id = UserId::new();
        state.admin_users.insert(username, (id, password_hash));
        Ok(id)
    }

    async fn find_admin_user_by_username(&self, username: &str) -> FlagzResult<(UserId, String)> {
        self.state.lock().unwrap().admin_users.get(username).cloned().ok_or(FlagzError::NotFound)
    }

    async fn create_api_key(&self, tenant_id: TenantId, id: ApiKeyId, secret_hash: String) -> FlagzResult<ApiKey> {
        Ok(self.store.create_api_key(tenant_id, id, secret_hash))
    }

    async fn list_api_keys(&self, tenant_id: TenantId) -> FlagzResult<Vec<ApiKey>> {
        Ok(self.store.list_api_keys(tenant_id))
    }

    async fn revoke_api_key(&self, tenant_id: TenantId, id: ApiKeyId) -> FlagzResult<()> {
        self.store.revoke_api_key(tenant_id, id)
    }
}

// ---------------------------------------------------------------------
// Postgres backend: raw queries against the same `tenants`/`admin_users`/
// `api_keys` tables `PostgresFlagStore` uses, independent of that store
// (this repo's operations are outside C1's own contract).
// ---------------------------------------------------------------------

pub struct PostgresAdminRepo {
    pool: PgPool,
}

impl PostgresAdminRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Mirrors `flagz_store::postgres`'s `sqlx::Error` → `FlagzError` mapping:
/// `23505` (unique violation) becomes `AlreadyExists`, everything else is a
/// transient/fatal infrastructure failure.
fn map_sqlx(context: &str, err: sqlx::Error) -> FlagzError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return FlagzError::already_exists(context.to_string());
        }
    }
    FlagzError::transient(format!("{context}: {err}"))
}

#[async_trait]
impl AdminRepo for PostgresAdminRepo {
    async fn create_tenant(&self, name: String, description: String) -> FlagzResult<Tenant> {
        let id = TenantId::new();
        let row = sqlx::query(
            "INSERT INTO tenants (id, name, description) VALUES ($1, $2, $3)
             RETURNING id, name, description, created_at, updated_at",
        )
        .bind(id.as_uuid())
        .bind(&name)
        .bind(&description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("tenant", e))?;

        Ok(Tenant {
            id: row.try_get::<uuid::Uuid, _>("id").map_err(|e| map_sqlx("tenant", e))?.into(),
            name: row.try_get("name").map_err(|e| map_sqlx("tenant", e))?,
            description: row.try_get("description").map_err(|e| map_sqlx("tenant", e))?,
            created_at: row.try_get("created_at").map_err(|e| map_sqlx("tenant", e))?,
            updated_at: row.try_get("updated_at").map_err(|e| map_sqlx("tenant", e))?,
        })
    }

    async fn get_tenant(&self, id: TenantId) -> FlagzResult<Tenant> {
        let row = sqlx::query("SELECT id, name, description, created_at, updated_at FROM tenants WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("tenant", e))?
            .ok_or(FlagzError::NotFound)?;

        Ok(Tenant {
            id: row.try_get::<uuid::Uuid, _>("id").map_err(|e| map_sqlx("tenant", e))?.into(),
            name: row.try_get("name").map_err(|e| map_sqlx("tenant", e))?,
            description: row.try_get("description").map_err(|e| map_sqlx("tenant", e))?,
            created_at: row.try_get("created_at").map_err(|e| map_sqlx("tenant", e))?,
            updated_at: row.try_get("updated_at").map_err(|e| map_sqlx("tenant", e))?,
        })
    }

    async fn list_tenants(&self) -> FlagzResult<Vec<Tenant>> {
        let rows = sqlx::query("SELECT id, name, description, created_at, updated_at FROM tenants ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("tenant", e))?;

        rows.into_iter()
            .map(|row| {
                Ok(Tenant {
                    id: row.try_get::<uuid::Uuid, _>("id").map_err(|e| map_sqlx("tenant", e))?.into(),
                    name: row.try_get("name").map_err(|e| map_sqlx("tenant", e))?,
                    description: row.try_get("description").map_err(|e| map_sqlx("tenant", e))?,
                    created_at: row.try_get("created_at").map_err(|e| map_sqlx("tenant", e))?,
                    updated_at: row.try_get("updated_at").map_err(|e| map_sqlx("tenant", e))?,
                })
            })
            .collect()
    }

    async fn ensure_system_tenant(&self) -> FlagzResult<TenantId> {
        let id = system_tenant_id();
        sqlx::query(
            "INSERT INTO tenants (id, name, description) VALUES ($1, 'system', 'bootstrap/system entries')
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("system tenant", e))?;
        Ok(id)
    }

    async fn any_admin_user_exists(&self) -> FlagzResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM admin_users) AS present")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx("admin_users", e))?;
        row.try_get("present").map_err(|e| map_sqlx("admin_users", e))
    }

    async fn create_admin_user(&self, username: String, password_hash: String) -> FlagzResult<UserId> {
        let id = UserId::new();
        sqlx::query("INSERT INTO admin_users (id, username, password_hash) VALUES ($1, $2, $3)")
            .bind(id.as_uuid())
            .bind(&username)
            .bind(&password_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("admin user", e))?;
        Ok(id)
    }

    async fn find_admin_user_by_username(&self, username: &str) -> FlagzResult<(UserId, String)> {
        let row = sqlx::query("SELECT id, password_hash FROM admin_users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("admin user", e))?
            .ok_or(FlagzError::NotFound)?;
        let id: uuid::Uuid = row.try_get("id").map_err(|e| map_sqlx("admin user", e))?;
        let password_hash: String = row.try_get("password_hash").map_err(|e| map_sqlx("admin user", e))?;
        Ok((id.into(), password_hash))
    }

    async fn create_api_key(&self, tenant_id: TenantId, id: ApiKeyId, secret_hash: String) -> FlagzResult<ApiKey> {
        let row = sqlx::query(
            "INSERT INTO api_keys (id, tenant_id, secret_hash) VALUES ($1, $2, $3)
             RETURNING id, tenant_id, secret_hash, created_at, revoked_at",
        )
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(&secret_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("api key", e))?;

        Ok(ApiKey {
            id: row.try_get::<uuid::Uuid, _>("id").map_err(|e| map_sqlx("api key", e))?.into(),
            tenant_id: row.try_get::<uuid::Uuid, _>("tenant_id").map_err(|e| map_sqlx("api key", e))?.into(),
            secret_hash: row.try_get("secret_hash").map_err(|e| map_sqlx("api key", e))?,
            created_at: row.try_get("created_at").map_err(|e| map_sqlx("api key", e))?,
            revoked_at: row.try_get("revoked_at").map_err(|e| map_sqlx("api key", e))?,
        })
    }

    async fn list_api_keys(&self, tenant_id: TenantId) -> FlagzResult<Vec<ApiKey>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, secret_hash, created_at, revoked_at FROM api_keys
             WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("api key", e))?;

        rows.into_iter()
            .map(|row| {
                Ok(ApiKey {
                    id: row.try_get::<uuid::Uuid, _>("id").map_err(|e| map_sqlx("api key", e))?.into(),
                    tenant_id: row.try_get::<uuid::Uuid, _>("tenant_id").map_err(|e| map_sqlx("api key", e))?.into(),
                    secret_hash: row.try_get("secret_hash").map_err(|e| map_sqlx("api key", e))?,
                    created_at: row.try_get("created_at").map_err(|e| map_sqlx("api key", e))?,
                    revoked_at: row.try_get("revoked_at").map_err(|e| map_sqlx("api key", e))?,
                })
            })
            .collect()
    }

    async fn revoke_api_key(&self, tenant_id: TenantId, id: ApiKeyId) -> FlagzResult<()> {
        let result = sqlx::query(
            "UPDATE api_keys SET revoked_at = now()
             WHERE id = $1 AND tenant_id = $2 AND revoked_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("api key", e))?;

        if result.rows_affected() == 0 {
            return Err(FlagzError::NotFound);
        }
        Ok(())
    }
}
