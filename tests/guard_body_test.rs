//! Guard tests for fields sourced from the request body.
//!
//! The chama membership guard must find a declared field in the JSON body
//! when it is absent from path and query, re-materialize the body for the
//! handler, and refuse to buffer oversized bodies.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use sacco_gateway::auth::{
    access_guard_middleware, auth_middleware, AccessRequirement, ApiKeyService, AuthGatewayState,
    Authenticator, GuardState, InMemoryApiKeyRepository, JwtResolver, Role,
};
use sacco_gateway::chama::{Chama, ChamaMember, InMemoryChamaRegistry};
use sacco_gateway::metrics::MetricsRegistry;

use common::bearer;

/// Echoes the JSON body back, proving the guard re-materialized it.
async fn record_contribution(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

struct BodyGuardFixture {
    app: Router,
    jwt: Arc<JwtResolver>,
}

impl BodyGuardFixture {
    async fn new() -> Self {
        let chamas = Arc::new(InMemoryChamaRegistry::new());
        chamas
            .insert(Chama {
                id: "g-1".into(),
                name: "Umoja Savings".into(),
                members: vec![ChamaMember {
                    user_id: "u1".into(),
                }],
            })
            .await;

        let metrics = Arc::new(MetricsRegistry::new());
        let jwt = Arc::new(JwtResolver::new(
            common::JWT_SECRET,
            "sacco-gateway",
            "sacco-api",
        ));
        let api_keys = Arc::new(ApiKeyService::new(Arc::new(
            InMemoryApiKeyRepository::new(),
        )));
        let authenticator = Arc::new(Authenticator::new(api_keys).with_jwt(jwt.clone()));

        let app = Router::new()
            .route("/contributions", post(record_contribution))
            .route_layer(axum::middleware::from_fn_with_state(
                GuardState {
                    requirement: AccessRequirement::membership("chamaId"),
                    chamas,
                    metrics: metrics.clone(),
                },
                access_guard_middleware,
            ))
            .layer(axum::middleware::from_fn_with_state(
                AuthGatewayState {
                    authenticator,
                    require_auth: true,
                    metrics,
                },
                auth_middleware,
            ));

        Self { app, jwt }
    }

    fn token(&self, sub: &str) -> String {
        self.jwt
            .issue(sub, &[Role::Member], chrono::Duration::hours(1))
            .unwrap()
    }

    async fn post(
        &self,
        uri: &str,
        token: &str,
        body: Vec<u8>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .header("authorization", bearer(token))
            .body(Body::from(body))
            .unwrap();

        let response = self
            .app
            .clone()
            .into_service::<Body>()
            .oneshot(request)
            .await
            .unwrap();

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        let json = serde_json::from_slice(&bytes).unwrap_or(json!({}));
        (status, json)
    }
}

#[tokio::test]
async fn test_body_sourced_field_reaches_guard_and_handler() {
    let fixture = BodyGuardFixture::new().await;
    let token = fixture.token("u1");

    let payload = json!({ "chamaId": "g-1", "amount_sats": 5000 });
    let (status, body) = fixture
        .post(
            "/contributions",
            &token,
            serde_json::to_vec(&payload).unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    // The handler saw the full body after the guard consumed it
    assert_eq!(body, payload);
}

#[tokio::test]
async fn test_body_sourced_field_still_denies_non_members() {
    let fixture = BodyGuardFixture::new().await;
    let token = fixture.token("u3");

    let payload = json!({ "chamaId": "g-1", "amount_sats": 5000 });
    let (status, body) = fixture
        .post(
            "/contributions",
            &token,
            serde_json::to_vec(&payload).unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn test_absent_field_is_a_client_error() {
    let fixture = BodyGuardFixture::new().await;
    let token = fixture.token("u1");

    let payload = json!({ "amount_sats": 5000 });
    let (status, body) = fixture
        .post(
            "/contributions",
            &token,
            serde_json::to_vec(&payload).unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "missing_parameter");
}

#[tokio::test]
async fn test_query_fallback_when_body_lacks_the_field() {
    let fixture = BodyGuardFixture::new().await;
    let token = fixture.token("u1");

    let payload = json!({ "amount_sats": 5000 });
    let (status, _) = fixture
        .post(
            "/contributions?chamaId=g-1",
            &token,
            serde_json::to_vec(&payload).unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_oversized_body_is_rejected_before_the_handler() {
    let fixture = BodyGuardFixture::new().await;
    let token = fixture.token("u1");

    // Past the guard's buffering bound
    let payload = json!({ "chamaId": "g-1", "pad": "x".repeat(300 * 1024) });
    let (status, body) = fixture
        .post(
            "/contributions",
            &token,
            serde_json::to_vec(&payload).unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "payload_too_large");
}
