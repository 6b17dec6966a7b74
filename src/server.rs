//! HTTP server bootstrap for the Sacco Gateway.
//!
//! This module wires together:
//! - configuration
//! - the API key service and authenticator
//! - the rate limiter and its counter store (Redis or in-memory)
//! - the Axum router with the guard chain

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::auth::{
    auth_middleware, ApiKeyRecord, ApiKeyScope, ApiKeyService, AuthGatewayState, Authenticator,
    InMemoryApiKeyRepository, JwtResolver, API_KEY_PREFIX,
};
use crate::chama::{ChamaRegistry, InMemoryChamaRegistry};
use crate::infra::ShutdownCoordinator;
use crate::metrics::MetricsRegistry;
use crate::ratelimit::{
    CounterStore, InMemoryCounterStore, RateLimitConfig, RateLimiter, RedisCounterStore,
    DEFAULT_SWEEP_INTERVAL,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Redis connection URL; counters stay in-process when unset.
    pub redis_url: Option<String>,
    /// Throttle window configuration.
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .expect("Invalid listen address");

        let redis_url = std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty());

        Self {
            listen_addr,
            redis_url,
            rate_limit: RateLimitConfig::from_env(),
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyService>,
    pub chamas: Arc<dyn ChamaRegistry>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Sacco Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!(
        "  Throttle: {} hits / {:?}, block {:?}",
        config.rate_limit.limit, config.rate_limit.window, config.rate_limit.block_duration
    );

    let metrics = Arc::new(MetricsRegistry::new());

    // Auth configuration
    let auth_mode = std::env::var("AUTH_MODE").unwrap_or_else(|_| "required".to_string());
    let require_auth = auth_mode != "disabled";

    let repository = Arc::new(InMemoryApiKeyRepository::new());
    let mut any_auth_configured = false;

    if let Ok(bootstrap_key) = std::env::var("BOOTSTRAP_ADMIN_API_KEY") {
        if !bootstrap_key.starts_with(API_KEY_PREFIX) {
            warn!(
                "BOOTSTRAP_ADMIN_API_KEY does not start with {API_KEY_PREFIX:?}; it will never verify"
            );
        }
        register_bootstrap_key(&repository, &bootstrap_key).await?;
        any_auth_configured = true;
        info!("Bootstrap admin API key is configured");
    }

    let api_keys = Arc::new(ApiKeyService::new(repository));

    let jwt_resolver = match std::env::var("JWT_SECRET") {
        Ok(secret) => {
            let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "sacco-gateway".to_string());
            let audience =
                std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "sacco-api".to_string());
            any_auth_configured = true;
            Some(Arc::new(JwtResolver::new(
                secret.as_bytes(),
                &issuer,
                &audience,
            )))
        }
        Err(_) => None,
    };

    if require_auth && !any_auth_configured {
        anyhow::bail!(
            "AUTH_MODE=required but no auth is configured; set JWT_SECRET or BOOTSTRAP_ADMIN_API_KEY (or set AUTH_MODE=disabled for local dev)"
        );
    }

    let authenticator = {
        let authenticator = Authenticator::new(api_keys.clone());
        match jwt_resolver {
            Some(jwt) => Arc::new(authenticator.with_jwt(jwt)),
            None => Arc::new(authenticator),
        }
    };

    let auth_state = AuthGatewayState {
        authenticator,
        require_auth,
        metrics: metrics.clone(),
    };

    // Counter store: Redis when configured and reachable, in-memory
    // otherwise. The in-memory store always exists; the Redis store keeps
    // it as its degradation fallback, and the sweeper covers both cases.
    let coordinator = ShutdownCoordinator::new();
    let memory_store = Arc::new(InMemoryCounterStore::new());
    let sweeper = memory_store.start_sweeper(DEFAULT_SWEEP_INTERVAL, coordinator.signal());

    let counter_store: Arc<dyn CounterStore> = match &config.redis_url {
        Some(url) => {
            match RedisCounterStore::connect(url, memory_store.clone(), metrics.clone()).await {
                Ok(store) => {
                    info!("Connected to Redis for throttle counters");
                    Arc::new(store)
                }
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, using in-memory throttle counters");
                    memory_store.clone()
                }
            }
        }
        None => {
            info!("REDIS_URL not set, using in-memory throttle counters");
            memory_store.clone()
        }
    };

    let limiter = Arc::new(RateLimiter::new(
        counter_store,
        config.rate_limit.clone(),
        metrics.clone(),
    ));

    // TODO: back this with the chama service client once its API is stable.
    let chamas: Arc<dyn ChamaRegistry> = Arc::new(InMemoryChamaRegistry::new());

    let state = AppState {
        api_keys,
        chamas,
        metrics,
    };

    // Build router
    let app = build_router(auth_state, &state, limiter)?.with_state(state);

    // Start server
    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("Sacco Gateway is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(crate::infra::shutdown_signal())
        .await?;

    coordinator.shutdown();
    let _ = sweeper.await;

    Ok(())
}

/// Register the operator-provided admin key so the gateway is usable
/// before any user key exists.
async fn register_bootstrap_key(
    repository: &Arc<InMemoryApiKeyRepository>,
    bootstrap_key: &str,
) -> anyhow::Result<()> {
    use crate::auth::ApiKeyRepository;

    let record = ApiKeyRecord {
        id: Uuid::new_v4(),
        key_hash: ApiKeyService::hash_secret(bootstrap_key),
        name: "bootstrap-admin".to_string(),
        owner_id: "bootstrap".to_string(),
        scopes: vec![ApiKeyScope::AdminAccess],
        expires_at: chrono::Utc::now() + chrono::Duration::days(36500),
        revoked: false,
        last_used_at: None,
        is_permanent: true,
        metadata: Default::default(),
    };
    repository
        .insert(&record)
        .await
        .map_err(|e| anyhow::anyhow!("registering bootstrap key: {e}"))?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn build_router(
    auth_state: AuthGatewayState,
    state: &AppState,
    limiter: Arc<RateLimiter>,
) -> anyhow::Result<Router<AppState>> {
    let api = crate::api::router(state, limiter).layer(axum::middleware::from_fn_with_state(
        auth_state,
        auth_middleware,
    ));

    let mut router = Router::new()
        .nest("/api", api)
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer_from_env()? {
        router = router.layer(cors_layer);
    }

    Ok(router)
}

fn cors_layer_from_env() -> anyhow::Result<Option<CorsLayer>> {
    let origins = match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let origins = origins.trim();
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]),
    ))
}

/// Health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "sacco-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
