//! Shared domain types: identifiers, entities, and the error taxonomy used
//! across the store, cache, listener, fan-out, gate and audit sink.

pub mod domain;
pub mod entity;
pub mod error;
pub mod id;

pub use domain::{AdminSession, ApiKey, AuditActor, AuditEntry, ChangeEnvelope, EventType, Flag, FlagEvent, Tenant};
pub use error::{FlagzError, FlagzResult};
pub use id::{ApiKeyId, EventId, FlagKey, TenantId, UserId};
