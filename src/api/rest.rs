//! REST endpoints for the Sacco Gateway.
//!
//! Route groups attach their guard layers here; within a group the chain
//! runs authentication (outer, applied in `server`), then the access
//! guard, then the API-key scope guard, then the rate limit (innermost).

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{
    access_guard_middleware, rate_limit_middleware, scope_guard_middleware, AccessRequirement,
    ApiKeyRecord, ApiKeyScope, AuthError, GuardState, PrincipalExt, RateLimitState, ScopeState,
    Role,
};
use crate::chama::ChamaLookupError;
use crate::metrics::names;
use crate::ratelimit::RateLimiter;
use crate::server::AppState;
use std::sync::Arc;

use super::ApiError;

/// Build the `/api` router with per-group guard layers.
///
/// Layer order per group, outermost first: access guard, then the API-key
/// scope guard, then the rate limit. Authentication is applied by the
/// server around the whole router, so the chain runs authentication ->
/// guard -> scope -> rate limit -> handler.
pub fn router(state: &AppState, limiter: Arc<RateLimiter>) -> Router<AppState> {
    let guard = |requirement: AccessRequirement| {
        from_fn_with_state(
            GuardState {
                requirement,
                chamas: state.chamas.clone(),
                metrics: state.metrics.clone(),
            },
            access_guard_middleware,
        )
    };
    let scope = |required: ApiKeyScope| {
        from_fn_with_state(
            ScopeState {
                required,
                metrics: state.metrics.clone(),
            },
            scope_guard_middleware,
        )
    };
    let throttle = || {
        from_fn_with_state(
            RateLimitState {
                limiter: limiter.clone(),
            },
            rate_limit_middleware,
        )
    };

    let apikeys = Router::new()
        .route("/v1/apikeys", post(issue_api_key))
        .route("/v1/apikeys/:keyId/rotate", post(rotate_api_key))
        .route("/v1/apikeys/:keyId", delete(revoke_api_key))
        .route_layer(throttle())
        .route_layer(scope(ApiKeyScope::UserWrite));

    let owned = Router::new()
        .route("/v1/users/:userId/apikeys", get(list_user_api_keys))
        .route_layer(throttle())
        .route_layer(scope(ApiKeyScope::UserRead))
        .route_layer(guard(AccessRequirement::ownership("userId")));

    let chama = Router::new()
        .route("/v1/chamas/:chamaId/members", get(list_chama_members))
        .route_layer(throttle())
        .route_layer(scope(ApiKeyScope::ChamaRead))
        .route_layer(guard(AccessRequirement::membership("chamaId")));

    let admin = Router::new()
        .route("/v1/metrics", get(metrics_snapshot))
        .route_layer(throttle())
        .route_layer(guard(AccessRequirement::roles(vec![
            Role::Admin,
            Role::SuperAdmin,
        ])));

    Router::new()
        .merge(apikeys)
        .merge(owned)
        .merge(chama)
        .merge(admin)
}

// ============================================================================
// API key management
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IssueApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<ApiKeyScope>,
    /// Days until expiry; defaults to 30.
    pub ttl_days: Option<i64>,
    #[serde(default)]
    pub is_permanent: bool,
}

/// Issue response; the only place the plaintext secret ever appears.
#[derive(Debug, Serialize)]
pub struct IssuedApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub scopes: Vec<ApiKeyScope>,
    pub expires_at: DateTime<Utc>,
    pub is_permanent: bool,
}

/// Record view with the digest stripped.
#[derive(Debug, Serialize)]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub name: String,
    pub owner_id: String,
    pub scopes: Vec<ApiKeyScope>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_permanent: bool,
}

impl From<ApiKeyRecord> for ApiKeySummary {
    fn from(record: ApiKeyRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            owner_id: record.owner_id,
            scopes: record.scopes,
            expires_at: record.expires_at,
            revoked: record.revoked,
            last_used_at: record.last_used_at,
            is_permanent: record.is_permanent,
        }
    }
}

async fn issue_api_key(
    State(state): State<AppState>,
    Extension(PrincipalExt(principal)): Extension<PrincipalExt>,
    Json(req): Json<IssueApiKeyRequest>,
) -> Result<(StatusCode, Json<IssuedApiKeyResponse>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }

    if !principal.is_privileged() {
        if let Some(scope) = req.scopes.iter().find(|s| !s.is_self_grantable()) {
            return Err(AuthError::Forbidden(format!(
                "scope {scope} requires admin access"
            ))
            .into());
        }
        if req.is_permanent {
            return Err(
                AuthError::Forbidden("permanent keys require admin access".into()).into(),
            );
        }
    }

    let ttl_days = req.ttl_days.unwrap_or(30);
    if ttl_days <= 0 {
        return Err(ApiError::bad_request("ttl_days must be positive"));
    }

    let issued = state
        .api_keys
        .issue(
            &principal.id,
            req.name.trim(),
            req.scopes,
            Duration::days(ttl_days),
            req.is_permanent,
        )
        .await?;
    state.metrics.inc_counter(names::APIKEY_ISSUED).await;

    Ok((
        StatusCode::CREATED,
        Json(IssuedApiKeyResponse {
            id: issued.record.id,
            name: issued.record.name,
            api_key: issued.plaintext,
            scopes: issued.record.scopes,
            expires_at: issued.record.expires_at,
            is_permanent: issued.record.is_permanent,
        }),
    ))
}

async fn list_user_api_keys(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ApiKeySummary>>, ApiError> {
    let records = state.api_keys.list_for_owner(&user_id).await?;
    Ok(Json(records.into_iter().map(ApiKeySummary::from).collect()))
}

/// Owner-or-admin check for operations addressed by key id.
fn ensure_key_access(
    principal: &crate::auth::Principal,
    record: &ApiKeyRecord,
) -> Result<(), ApiError> {
    if principal.is_privileged() || record.owner_id == principal.id {
        Ok(())
    } else {
        Err(AuthError::Forbidden("api key owned by another user".into()).into())
    }
}

async fn rotate_api_key(
    State(state): State<AppState>,
    Extension(PrincipalExt(principal)): Extension<PrincipalExt>,
    Path(key_id): Path<Uuid>,
) -> Result<Json<IssuedApiKeyResponse>, ApiError> {
    let record = state
        .api_keys
        .get(key_id)
        .await?
        .ok_or_else(|| ApiError::not_found("api key"))?;
    ensure_key_access(&principal, &record)?;

    let rotated = state.api_keys.rotate(key_id).await?;
    state.metrics.inc_counter(names::APIKEY_ROTATED).await;

    Ok(Json(IssuedApiKeyResponse {
        id: rotated.record.id,
        name: rotated.record.name,
        api_key: rotated.plaintext,
        scopes: rotated.record.scopes,
        expires_at: rotated.record.expires_at,
        is_permanent: rotated.record.is_permanent,
    }))
}

async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(PrincipalExt(principal)): Extension<PrincipalExt>,
    Path(key_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let record = state
        .api_keys
        .get(key_id)
        .await?
        .ok_or_else(|| ApiError::not_found("api key"))?;
    ensure_key_access(&principal, &record)?;

    state.api_keys.revoke(key_id).await?;
    state.metrics.inc_counter(names::APIKEY_REVOKED).await;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Chama routes
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChamaMembersResponse {
    pub chama_id: String,
    pub name: String,
    pub members: Vec<String>,
}

async fn list_chama_members(
    State(state): State<AppState>,
    Path(chama_id): Path<String>,
) -> Result<Json<ChamaMembersResponse>, ApiError> {
    let chama = state
        .chamas
        .find_chama(&chama_id)
        .await
        .map_err(|e| match e {
            ChamaLookupError::NotFound(_) => ApiError::not_found("chama"),
            ChamaLookupError::Unavailable(_) => {
                AuthError::UpstreamUnavailable("chama lookup".into()).into()
            }
        })?;

    Ok(Json(ChamaMembersResponse {
        chama_id: chama.id,
        name: chama.name,
        members: chama.members.into_iter().map(|m| m.user_id).collect(),
    }))
}

// ============================================================================
// Observability
// ============================================================================

async fn metrics_snapshot(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.metrics.snapshot().await)
}
