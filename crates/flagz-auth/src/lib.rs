//! Credential Gate (C6): bearer API-key parsing and verification, admin
//! session token hashing, a sliding-window rate limiter, and constant-time
//! comparisons for anything security-sensitive.

pub mod bearer;
pub mod gate;
pub mod hashing;
pub mod rate_limit;
pub mod session;
pub mod sweep;

pub use bearer::{format_token, parse_authorization_header, parse_token, ParsedBearerToken};
pub use gate::CredentialGate;
pub use rate_limit::RateLimiter;
pub use sweep::SweepHandle;
