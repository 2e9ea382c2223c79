//! Evaluation Cache (C4): a per-tenant read-through cache of flag
//! definitions. Reads are served from memory when populated; misses fall
//! through to the store, populate the entry, and return.
//!
//! On every signal from the invalidation listener, the cache clears its
//! entire contents; the next read for any key re-populates lazily. This
//! satisfies the correctness contract either way a backend might choose to
//! interpret "stale" (clear-all vs. lazy-reread), because a cleared entry
//! and a lazily-rereading entry behave identically from the caller's view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing::debug;

use flagz_core::{Flag, FlagKey, FlagzResult, TenantId};
use flagz_store::FlagStore;

type Key = (TenantId, FlagKey);

/// The evaluation-facing view of a flag. This is the single translation
/// point the `Enabled`-vs-`Disabled` polarity open question (spec §9) calls
/// for: the store and wire types use `enabled: bool` (`Enabled` semantics)
/// end-to-end, and this conversion is where a future evaluation core wanting
/// `Disabled`-oriented polarity would flip it, instead of scattering bool
/// logic through evaluation code.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagSnapshot {
    pub tenant_id: TenantId,
    pub key: FlagKey,
    pub description: String,
    pub enabled: bool,
    pub variants: serde_json::Value,
    pub rules: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Flag> for FlagSnapshot {
    fn from(flag: Flag) -> Self {
        Self {
            tenant_id: flag.tenant_id,
            key: flag.key,
            description: flag.description,
            enabled: flag.enabled,
            variants: flag.variants,
            rules: flag.rules,
            created_at: flag.created_at,
            updated_at: flag.updated_at,
        }
    }
}

pub struct EvaluationCache<S> {
    store: Arc<S>,
    entries: RwLock<HashMap<Key, Flag>>,
    /// One lock per currently-missing key, so concurrent misses on the same
    /// `(tenant, key)` collapse into a single store read (single-flight).
    key_locks: Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>,
}

impl<S> EvaluationCache<S>
where
    S: FlagStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serves `GetFlag(tenant, key)` from memory when populated; on a miss,
    /// loads from the store exactly once per key even under concurrent
    /// callers. Returns the evaluation-facing `FlagSnapshot`, translated at
    /// this boundary from the store's `Flag`.
    pub async fn get_flag(&self, tenant_id: TenantId, key: &FlagKey) -> FlagzResult<FlagSnapshot> {
        if let Some(flag) = self.read_cached(tenant_id, key) {
            return Ok(flag.into());
        }

        let lock = self.key_lock(tenant_id, key);
        let _guard = lock.lock().await;

        // Someone else may have populated the entry while we waited for the lock.
        if let Some(flag) = self.read_cached(tenant_id, key) {
            return Ok(flag.into());
        }

        let flag = self.store.get_flag(tenant_id, key).await?;

        self.entries.write().unwrap().insert((tenant_id, key.clone()), flag.clone());
        Ok(flag.into())
    }

    /// Invalidates the entire cache. Call on every signal from the
    /// invalidation listener: after this returns, no subsequent `get_flag`
    /// may return a snapshot that predates the signal.
    pub fn invalidate_all(&self) {
        self.entries.write().unwrap().clear();
    }

    fn read_cached(&self, tenant_id: TenantId, key: &FlagKey) -> Option<Flag> {
        self.entries.read().unwrap().get(&(tenant_id, key.clone())).cloned()
    }

    fn key_lock(&self, tenant_id: TenantId, key: &FlagKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock().unwrap();
        locks
            .entry((tenant_id, key.clone()))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Drains `signal_rx` for the lifetime of the cache, invalidating on every
/// pulse. Returns when the channel closes (the listener shut down or its
/// handle was dropped); callers typically run this as its own tokio task
/// alongside the cache.
pub async fn drive_invalidation<S>(cache: Arc<EvaluationCache<S>>, mut signal_rx: mpsc::Receiver<()>)
where
    S: FlagStore,
{
    while signal_rx.recv().await.is_some() {
        debug!("evaluation cache invalidated");
        cache.invalidate_all();
    }
}
