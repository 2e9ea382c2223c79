//! Credential Gate (C6): the single place API-key and admin-session
//! credentials are turned into an authenticated tenant/session context.
//!
//! Deliberately thin: this crate owns parsing and comparison; `FlagStore`
//! owns the lookups. Callers (the HTTP layer) are expected to run requests
//! through `RateLimiter` before reaching here.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use flagz_core::{AdminSession, FlagzError, FlagzResult, TenantId};
use flagz_store::FlagStore;

use crate::bearer::parse_authorization_header;
use crate::{hashing, session};

pub struct CredentialGate<S> {
    store: Arc<S>,
    session_key: Vec<u8>,
}

impl<S> CredentialGate<S>
where
    S: FlagStore,
{
    pub fn new(store: Arc<S>, session_key: Vec<u8>) -> Self {
        Self { store, session_key }
    }

    /// Authenticates a client-API request from its `Authorization` header.
    /// Any failure — malformed token, unknown key, revoked key, wrong
    /// secret — collapses to `Unauthorized`, so a caller can't distinguish
    /// "no such key" from "wrong secret" by the error shape.
    pub async fn authenticate_api_key(&self, authorization_header: &str) -> FlagzResult<TenantId> {
        let parsed = parse_authorization_header(authorization_header)?;
        let (stored_hash, tenant_id) = self.store.validate_api_key(parsed.key_id).await.map_err(|e| match e {
            FlagzError::NotFound => FlagzError::Unauthorized,
            other => other,
        })?;

        if !hashing::verify_secret(&parsed.secret, &stored_hash) {
            return Err(FlagzError::Unauthorized);
        }

        Ok(tenant_id)
    }

    /// Authenticates an admin portal request from its session cookie value.
    pub async fn authenticate_admin_session(&self, token: &str, now: DateTime<Utc>) -> FlagzResult<AdminSession> {
        let hash = session::hash_token(&self.session_key, token);
        self.store.get_admin_session(&hash, now).await.map_err(|e| match e {
            FlagzError::NotFound => FlagzError::Unauthorized,
            other => other,
        })
    }

    /// Checks a presented anti-forgery token (e.g. an `X-CSRF-Token` header)
    /// against the one bound to the session at login, in constant time.
    pub fn verify_anti_forgery(&self, existing_session: &AdminSession, presented: &str) -> FlagzResult<()> {
        if session::tokens_match(&existing_session.anti_forgery_token, presented) {
            Ok(())
        } else {
            Err(FlagzError::Unauthorized)
        }
    }

    pub fn hash_session_token(&self, token: &str) -> String {
        session::hash_token(&self.session_key, token)
    }
}
