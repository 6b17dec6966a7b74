//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use sacco_gateway::auth::{
    auth_middleware, ApiKeyService, AuthGatewayState, Authenticator, InMemoryApiKeyRepository,
    JwtResolver, Role,
};
use sacco_gateway::chama::{Chama, ChamaMember, InMemoryChamaRegistry};
use sacco_gateway::metrics::MetricsRegistry;
use sacco_gateway::ratelimit::{InMemoryCounterStore, RateLimitConfig, RateLimiter};
use sacco_gateway::server::AppState;

pub const JWT_SECRET: &[u8] = b"integration-test-secret-32-bytes";

/// A fully wired gateway router with in-memory backends.
pub struct TestGateway {
    pub app: axum::Router,
    pub api_keys: Arc<ApiKeyService>,
    pub chamas: Arc<InMemoryChamaRegistry>,
    pub metrics: Arc<MetricsRegistry>,
    jwt: Arc<JwtResolver>,
}

impl TestGateway {
    /// Gateway with a limit high enough to never throttle.
    pub fn new() -> Self {
        Self::with_rate_limit(RateLimitConfig {
            window: Duration::from_secs(60),
            limit: 10_000,
            block_duration: Duration::from_secs(60),
        })
    }

    pub fn with_rate_limit(config: RateLimitConfig) -> Self {
        let repository = Arc::new(InMemoryApiKeyRepository::new());
        let api_keys = Arc::new(ApiKeyService::new(repository));
        let chamas = Arc::new(InMemoryChamaRegistry::new());
        let metrics = Arc::new(MetricsRegistry::new());

        let limiter = Arc::new(RateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            config,
            metrics.clone(),
        ));

        let jwt = Arc::new(JwtResolver::new(JWT_SECRET, "sacco-gateway", "sacco-api"));
        let authenticator = Arc::new(Authenticator::new(api_keys.clone()).with_jwt(jwt.clone()));
        let auth_state = AuthGatewayState {
            authenticator,
            require_auth: true,
            metrics: metrics.clone(),
        };

        let state = AppState {
            api_keys: api_keys.clone(),
            chamas: chamas.clone(),
            metrics: metrics.clone(),
        };

        let api = sacco_gateway::api::router(&state, limiter).layer(
            axum::middleware::from_fn_with_state(auth_state, auth_middleware),
        );
        let app = axum::Router::new().nest("/api", api).with_state(state);

        Self {
            app,
            api_keys,
            chamas,
            metrics,
            jwt,
        }
    }

    /// Issue a short-lived bearer token for a test user.
    pub fn token(&self, sub: &str, roles: &[Role]) -> String {
        self.jwt
            .issue(sub, roles, chrono::Duration::hours(1))
            .expect("issuing test token")
    }

    pub async fn seed_chama(&self, id: &str, name: &str, members: &[&str]) {
        self.chamas
            .insert(Chama {
                id: id.to_string(),
                name: name.to_string(),
                members: members
                    .iter()
                    .map(|m| ChamaMember {
                        user_id: m.to_string(),
                    })
                    .collect(),
            })
            .await;
    }

    /// Send a request; `auth` is the full Authorization header value.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        auth: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, HeaderMap, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }

        let body = body
            .map(|v| Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap_or_else(|| Body::from(Vec::new()));

        let response = self
            .app
            .clone()
            .into_service::<Body>()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();

        let json = if bytes.is_empty() {
            json!({})
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| json!({ "raw": String::from_utf8_lossy(&bytes) }))
        };

        (status, headers, json)
    }

    pub async fn get(
        &self,
        uri: &str,
        auth: Option<&str>,
    ) -> (StatusCode, HeaderMap, serde_json::Value) {
        self.request(Method::GET, uri, auth, None).await
    }
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn api_key_header(key: &str) -> String {
    format!("ApiKey {key}")
}
