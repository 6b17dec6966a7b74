//! Guard chain wiring for Axum
//!
//! The middleware layers compose the chain described in the module docs:
//! [`auth_middleware`] resolves the principal, [`access_guard_middleware`]
//! evaluates the per-route [`AccessRequirement`],
//! [`scope_guard_middleware`] holds API-key principals to the scope an
//! operation declares, and [`rate_limit_middleware`] throttles by
//! identity. Routes attach them so that authentication runs first and the
//! rate limit last.

use axum::{
    body::{to_bytes, Body},
    extract::{Query, RawPathParams, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    check_api_key_scope, check_ownership, check_roles, AccessRequirement, ApiKeyScope,
    ApiKeyService, AuthError, ChamaMemberGuard, JwtResolver, Principal, Role, RequestParams,
    API_KEY_PREFIX,
};
use crate::api::ApiError;
use crate::chama::ChamaRegistry;
use crate::metrics::{names, MetricsRegistry};
use crate::ratelimit::RateLimiter;

/// Largest request body the guards will buffer while extracting a declared
/// field. Larger bodies are rejected before any handler runs.
pub const GUARD_BODY_LIMIT: usize = 256 * 1024;

/// Combined authenticator supporting JWT bearer tokens and API keys.
pub struct Authenticator {
    api_keys: Arc<ApiKeyService>,
    jwt: Option<Arc<JwtResolver>>,
}

impl Authenticator {
    pub fn new(api_keys: Arc<ApiKeyService>) -> Self {
        Self {
            api_keys,
            jwt: None,
        }
    }

    pub fn with_jwt(mut self, jwt: Arc<JwtResolver>) -> Self {
        self.jwt = Some(jwt);
        self
    }

    /// Resolve a principal from the Authorization header.
    pub async fn authenticate(&self, auth_header: Option<&str>) -> Result<Principal, AuthError> {
        let header = auth_header.ok_or(AuthError::Unauthenticated)?;

        if let Some(token) = header.strip_prefix("Bearer ") {
            if let Some(jwt) = &self.jwt {
                return jwt.resolve(token);
            }
            return Err(AuthError::InvalidCredential);
        }

        if let Some(key) = header.strip_prefix("ApiKey ") {
            return Ok(self.api_keys.verify(key).await?.principal());
        }

        // Raw API key without a scheme
        if header.starts_with(API_KEY_PREFIX) {
            return Ok(self.api_keys.verify(header).await?.principal());
        }

        Err(AuthError::Unauthenticated)
    }
}

/// Principal extension attached to authenticated requests.
#[derive(Clone)]
pub struct PrincipalExt(pub Principal);

/// State for the authentication layer.
#[derive(Clone)]
pub struct AuthGatewayState {
    pub authenticator: Arc<Authenticator>,
    /// If false, unauthenticated requests get a synthetic admin principal
    /// (dev mode).
    pub require_auth: bool,
    pub metrics: Arc<MetricsRegistry>,
}

/// Authentication middleware; first guard in the chain.
pub async fn auth_middleware(
    State(state): State<AuthGatewayState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.authenticator.authenticate(auth_header).await {
        Ok(principal) => {
            request.extensions_mut().insert(PrincipalExt(principal));
        }
        Err(e) if state.require_auth => return deny(&state.metrics, e).await,
        Err(_) => {
            request.extensions_mut().insert(PrincipalExt(Principal::new(
                "dev-admin",
                vec![Role::SuperAdmin],
            )));
        }
    }

    next.run(request).await
}

/// State for a per-route access guard layer.
#[derive(Clone)]
pub struct GuardState {
    pub requirement: AccessRequirement,
    pub chamas: Arc<dyn ChamaRegistry>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Role/ownership/membership guard; runs after authentication.
pub async fn access_guard_middleware(
    State(state): State<GuardState>,
    raw_path: RawPathParams,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let principal = match request.extensions().get::<PrincipalExt>() {
        Some(PrincipalExt(principal)) => principal.clone(),
        None => return deny(&state.metrics, AuthError::Unauthenticated).await,
    };

    match &state.requirement {
        AccessRequirement::Roles(required) => {
            if let Err(e) = check_roles(&principal, required) {
                return deny(&state.metrics, e).await;
            }
            next.run(request).await
        }
        AccessRequirement::Ownership { field } => {
            let (params, request) = match buffer_params(raw_path, query, request).await {
                Ok(v) => v,
                Err(response) => return response,
            };
            if let Err(e) = check_ownership(&principal, field, &params) {
                return deny(&state.metrics, e).await;
            }
            next.run(request).await
        }
        AccessRequirement::Membership { chama_id_field } => {
            let (params, request) = match buffer_params(raw_path, query, request).await {
                Ok(v) => v,
                Err(response) => return response,
            };
            let guard = ChamaMemberGuard::new(state.chamas.clone());
            if let Err(e) = guard.check(&principal, chama_id_field, &params).await {
                return deny(&state.metrics, e).await;
            }
            next.run(request).await
        }
    }
}

/// State for a per-route scope guard layer.
#[derive(Clone)]
pub struct ScopeState {
    pub required: ApiKeyScope,
    pub metrics: Arc<MetricsRegistry>,
}

/// Scope guard for API-key principals; runs after the access guard.
pub async fn scope_guard_middleware(
    State(state): State<ScopeState>,
    request: Request,
    next: Next,
) -> Response {
    let principal = match request.extensions().get::<PrincipalExt>() {
        Some(PrincipalExt(principal)) => principal.clone(),
        None => return deny(&state.metrics, AuthError::Unauthenticated).await,
    };

    if let Err(e) = check_api_key_scope(&principal, state.required) {
        return deny(&state.metrics, e).await;
    }
    next.run(request).await
}

/// State for the rate limit layer.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
}

/// Rate limit; last guard in the chain.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = identity_key(&request);
    // Denial metrics and fail-open handling live in the limiter itself.
    if let Err(e) = state.limiter.check(&identity).await {
        return ApiError::from(e).into_response();
    }
    next.run(request).await
}

/// Throttle identity for a request: API key, then user, then client IP.
pub fn identity_key(request: &Request) -> String {
    if let Some(PrincipalExt(principal)) = request.extensions().get::<PrincipalExt>() {
        if let Some(key_id) = principal.api_key_id {
            return format!("apikey:{key_id}");
        }
        return format!("user:{}", principal.id);
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| format!("ip:{}", ip.trim()))
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Record the denial and convert it to a response.
async fn deny(metrics: &MetricsRegistry, error: AuthError) -> Response {
    let counter = match &error {
        AuthError::Unauthenticated => names::DENIED_UNAUTHENTICATED,
        AuthError::InvalidCredential | AuthError::TokenExpired => names::DENIED_UNAUTHENTICATED,
        AuthError::Forbidden(_) => names::DENIED_FORBIDDEN,
        AuthError::MissingParameter(_) => names::DENIED_MISSING_PARAMETER,
        AuthError::RateLimited { .. } => names::DENIED_RATE_LIMITED,
        AuthError::UpstreamUnavailable(_) => names::DENIED_UPSTREAM_UNAVAILABLE,
    };
    metrics.inc_counter(counter).await;
    ApiError::from(error).into_response()
}

/// Collect path, query, and body parameters, re-materializing the body so
/// the handler still sees it.
async fn buffer_params(
    raw_path: RawPathParams,
    query: HashMap<String, String>,
    request: Request,
) -> Result<(RequestParams, Request), Response> {
    let path: HashMap<String, String> = raw_path
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, GUARD_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return Err((
                StatusCode::PAYLOAD_TOO_LARGE,
                axum::Json(serde_json::json!({
                    "error": "request body too large",
                    "code": "payload_too_large",
                })),
            )
                .into_response())
        }
    };

    let body_json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    let request = Request::from_parts(parts, Body::from(bytes));

    Ok((RequestParams::new(path, query, body_json), request))
}
