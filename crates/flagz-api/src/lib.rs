//! Thin Axum wiring over C1–C7: the admin HTTP surface and the client API
//! surface, demonstrating the core crates end to end.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
