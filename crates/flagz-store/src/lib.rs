//! Durable store (C1) and the event log it shares a transaction with (C2).

pub mod in_memory;
pub mod notify;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryFlagStore;
pub use notify::{build_envelope, sanitize_channel, DEFAULT_CHANNEL};
pub use postgres::PostgresFlagStore;
pub use r#trait::FlagStore;
