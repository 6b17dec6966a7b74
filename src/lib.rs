//! Sacco Gateway Library
//!
//! Access control and rate limiting for a sacco/chama fintech backend:
//! request authentication, role and ownership authorization, chama
//! membership checks, API key lifecycle, and identity-keyed throttling.
//!
//! ## Modules
//!
//! - [`auth`] - Principals, API keys, JWT, and the guard chain middleware
//! - [`chama`] - Chama records and the membership lookup seam
//! - [`ratelimit`] - Rate limiter and counter stores (in-memory, Redis)
//! - [`metrics`] - Observability counters
//! - [`infra`] - Graceful shutdown and background tasks
//! - [`api`] - REST API routes
//! - [`server`] - HTTP server bootstrap

pub mod api;
pub mod auth;
pub mod chama;
pub mod infra;
pub mod metrics;
pub mod ratelimit;
pub mod server;

// Re-export commonly used types
pub use auth::{
    AccessRequirement, ApiKeyRecord, ApiKeyScope, ApiKeyService, AuthError, Authenticator,
    JwtResolver, Principal, Role,
};
pub use ratelimit::{CounterStore, RateDecision, RateLimitConfig, RateLimiter};
