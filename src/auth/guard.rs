//! Role, ownership, and chama membership guards
//!
//! Routes declare an [`AccessRequirement`]; the guard evaluates it against
//! the resolved [`Principal`] and the request parameters. Evaluation is a
//! single terminal pass: no requirement means allow, otherwise the first
//! failing rule produces the denial.
//!
//! Every denial is logged with the principal id (when known) and the
//! declared requirement. Request data beyond ids is never logged.

use super::{ApiKeyScope, AuthError, Principal, Role};
use crate::chama::{ChamaLookupError, ChamaRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Per-operation authorization metadata, attached at route registration
/// time and read-only at request time.
#[derive(Debug, Clone)]
pub enum AccessRequirement {
    /// Allow iff the principal holds at least one of these roles.
    Roles(Vec<Role>),

    /// Allow iff the request field named here equals the principal id.
    /// Admin and SuperAdmin bypass.
    Ownership { field: String },

    /// Allow iff the principal is a member of the chama named by this
    /// request field. Admin and SuperAdmin bypass.
    Membership { chama_id_field: String },
}

impl AccessRequirement {
    pub fn roles(roles: impl Into<Vec<Role>>) -> Self {
        AccessRequirement::Roles(roles.into())
    }

    pub fn ownership(field: impl Into<String>) -> Self {
        AccessRequirement::Ownership {
            field: field.into(),
        }
    }

    pub fn membership(chama_id_field: impl Into<String>) -> Self {
        AccessRequirement::Membership {
            chama_id_field: chama_id_field.into(),
        }
    }
}

/// Request parameters visible to the guards.
///
/// `lookup` resolves a declared field against path parameters first, then
/// the query string, then top-level body fields; first match wins.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub path: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
}

impl RequestParams {
    pub fn new(path: HashMap<String, String>, query: HashMap<String, String>, body: Value) -> Self {
        Self { path, query, body }
    }

    pub fn lookup(&self, field: &str) -> Option<String> {
        if let Some(v) = self.path.get(field) {
            return Some(v.clone());
        }
        if let Some(v) = self.query.get(field) {
            return Some(v.clone());
        }
        match self.body.get(field) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Allow iff the principal's roles intersect the required set.
pub fn check_roles(principal: &Principal, required: &[Role]) -> Result<(), AuthError> {
    if required.iter().any(|r| principal.has_role(*r)) {
        return Ok(());
    }

    warn!(
        principal_id = %principal.id,
        required = ?required,
        "role check denied"
    );
    Err(AuthError::Forbidden("insufficient role".into()))
}

/// Allow iff the principal's credential grants the scope an operation
/// declares.
///
/// Bearer-token principals are governed by roles, not scopes, and pass
/// unconditionally. An `admin:access` key grants every scope.
pub fn check_api_key_scope(
    principal: &Principal,
    required: ApiKeyScope,
) -> Result<(), AuthError> {
    if principal.api_key_id.is_none() {
        return Ok(());
    }

    if principal.scopes.contains(&ApiKeyScope::AdminAccess)
        || principal.scopes.contains(&required)
    {
        return Ok(());
    }

    warn!(
        principal_id = %principal.id,
        required = %required,
        "api key scope check denied"
    );
    Err(AuthError::Forbidden(format!(
        "api key missing scope {required}"
    )))
}

/// Allow iff the declared field resolves to the principal's own id, or the
/// principal is privileged.
pub fn check_ownership(
    principal: &Principal,
    field: &str,
    params: &RequestParams,
) -> Result<(), AuthError> {
    if principal.is_privileged() {
        debug!(principal_id = %principal.id, "ownership check bypassed for admin");
        return Ok(());
    }

    let candidate = params.lookup(field).ok_or_else(|| {
        warn!(
            principal_id = %principal.id,
            field = %field,
            "ownership field absent from request"
        );
        AuthError::MissingParameter(field.to_string())
    })?;

    if candidate == principal.id {
        return Ok(());
    }

    warn!(
        principal_id = %principal.id,
        field = %field,
        "ownership check denied"
    );
    Err(AuthError::Forbidden("resource owned by another user".into()))
}

/// Restricts chama operations to chama members.
///
/// All lookup failures are converted to a denial at this boundary; the
/// guard never propagates a raw collaborator error.
pub struct ChamaMemberGuard {
    chamas: Arc<dyn ChamaRegistry>,
}

impl ChamaMemberGuard {
    pub fn new(chamas: Arc<dyn ChamaRegistry>) -> Self {
        Self { chamas }
    }

    pub async fn check(
        &self,
        principal: &Principal,
        chama_id_field: &str,
        params: &RequestParams,
    ) -> Result<(), AuthError> {
        if principal.is_privileged() {
            debug!(principal_id = %principal.id, "membership check bypassed for admin");
            return Ok(());
        }

        let chama_id = params.lookup(chama_id_field).ok_or_else(|| {
            warn!(
                principal_id = %principal.id,
                field = %chama_id_field,
                "chama id field absent from request"
            );
            AuthError::MissingParameter(chama_id_field.to_string())
        })?;

        let chama = match self.chamas.find_chama(&chama_id).await {
            Ok(chama) => chama,
            Err(ChamaLookupError::NotFound(_)) => {
                warn!(
                    principal_id = %principal.id,
                    chama_id = %chama_id,
                    "membership check denied: chama not found"
                );
                return Err(AuthError::Forbidden("not a member of this chama".into()));
            }
            Err(ChamaLookupError::Unavailable(reason)) => {
                error!(
                    principal_id = %principal.id,
                    chama_id = %chama_id,
                    error = %reason,
                    "chama lookup failed during membership check"
                );
                return Err(AuthError::UpstreamUnavailable("chama lookup".into()));
            }
        };

        if chama.has_member(&principal.id) {
            return Ok(());
        }

        warn!(
            principal_id = %principal.id,
            chama_id = %chama_id,
            "membership check denied: not a member"
        );
        Err(AuthError::Forbidden("not a member of this chama".into()))
    }
}
