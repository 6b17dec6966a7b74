//! Authentication and authorization for the Sacco Gateway
//!
//! This module provides the guard chain that fronts the wallet and chama
//! services. Every inbound request passes through it in order:
//!
//! 1. **Authentication** - resolve a [`Principal`] from a JWT bearer token
//!    or an API key
//! 2. **Role/ownership guard** - per-route [`AccessRequirement`] metadata
//! 3. **Chama membership guard** - group membership lookup
//! 4. **Scope guard** - API-key principals held to the per-route scope
//! 5. **Rate limit** - per-identity throttling
//!
//! Each guard either passes the request through or terminates it with a
//! classified [`AuthError`]. Collaborator failures never escape a guard as
//! raw transport errors.
//!
//! # Authorization Model
//!
//! - `Member`: access to resources they own or chamas they belong to
//! - `Admin` / `SuperAdmin`: bypass ownership and membership checks
//!
//! API keys additionally carry capability scopes (`user:read`,
//! `chama:write`, ...) checked per operation.
//!
//! # Configuration
//!
//! - `AUTH_MODE`: `required` (default) or `disabled` for development
//! - `BOOTSTRAP_ADMIN_API_KEY`: initial admin key for setup
//! - `JWT_SECRET` / `JWT_ISSUER` / `JWT_AUDIENCE`: bearer token validation

mod apikey;
mod guard;
mod jwt;
mod middleware;

pub use apikey::*;
pub use guard::*;
pub use jwt::*;
pub use middleware::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Platform role attached to a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved identity of the caller, immutable for the duration of a request.
///
/// Produced by the authentication step (JWT or API key); never constructed
/// from unverified request data.
#[derive(Debug, Clone)]
pub struct Principal {
    /// User id as issued by the auth service.
    pub id: String,

    /// Platform roles granted to this principal.
    pub roles: Vec<Role>,

    /// Set when the principal authenticated with an API key.
    pub api_key_id: Option<Uuid>,

    /// Capability scopes carried by the API key, empty for bearer tokens.
    /// Only consulted when `api_key_id` is set.
    pub scopes: Vec<ApiKeyScope>,

    /// Free-form metadata carried by the credential.
    pub metadata: HashMap<String, String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            id: id.into(),
            roles,
            api_key_id: None,
            scopes: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Admins and SuperAdmins bypass ownership and membership checks.
    pub fn is_privileged(&self) -> bool {
        self.has_role(Role::Admin) || self.has_role(Role::SuperAdmin)
    }
}

/// Classified denial, one variant per user-visible outcome.
///
/// Guards convert every collaborator failure into one of these; nothing
/// propagates past a guard as an unhandled fault.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No principal could be resolved from the request.
    #[error("authentication required")]
    Unauthenticated,

    /// A credential was presented but did not verify.
    #[error("invalid credential")]
    InvalidCredential,

    /// The bearer token verified but is past its expiry.
    #[error("token expired")]
    TokenExpired,

    /// Principal known, insufficient role/ownership/membership/scope.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A declared field was absent from path, query, and body.
    #[error("missing request parameter: {0}")]
    MissingParameter(String),

    /// Identity exceeded its request budget.
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A consumed collaborator (chama lookup, credential store) failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl AuthError {
    /// Stable machine-readable code, one per denial kind.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "unauthenticated",
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::TokenExpired => "token_expired",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::MissingParameter(_) => "missing_parameter",
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}
