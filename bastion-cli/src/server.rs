use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get},
    Json, Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;

use bastion_core::client::{LayerHealth, ResilienceClient};
use bastion_core::config::{ResilienceConfig, StorageSelector};
use bastion_core::types::HealthStatus;

use crate::handlers::*;

pub type AppState = Arc<ResilienceClient>;

/// Upper bound on in-flight admin requests.
const MAX_CONCURRENT_REQUESTS: usize = 64;

pub async fn run(host: &str, port: u16, config: ResilienceConfig) -> anyhow::Result<()> {
    let state: AppState = Arc::new(create_client(config));

    let app = Router::new()
        // Health is always open (no auth)
        .route("/health", get(health))
        // Protected routes
        .route("/locks/{id}", get(lock_status).delete(force_release_lock))
        .route("/sessions/by-agent/{agent_id}", get(session_by_agent))
        .route("/sessions/{id}", get(get_session).delete(unbind_session))
        .route(
            "/rate-limits/{operation}/{resource_id}",
            get(rate_limit_count).delete(reset_rate_limit),
        )
        .route("/metadata", delete(invalidate_all_metadata))
        .route("/metadata/{agent_id}", delete(invalidate_metadata))
        .layer(middleware::from_fn(auth_middleware))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", host, port);

    if std::env::var("BASTION_API_KEY").is_ok_and(|k| !k.is_empty()) {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!("No BASTION_API_KEY set, admin server is open (dev mode)");
    }

    tracing::info!(%addr, "Bastion admin server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // If no API key is configured, allow all requests (dev mode)
    let expected_key = match std::env::var("BASTION_API_KEY") {
        Ok(key) if !key.is_empty() => key,
        _ => return Ok(next.run(request).await),
    };

    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token == expected_key {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "Unauthorized admin request");
        Err(StatusCode::UNAUTHORIZED)
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn bad_request<T: serde::Serialize>(msg: String) -> Reply<T> {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::err(msg)))
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Reply<HealthResponse<LayerHealth>> {
    let layer = state.health().await;
    let code = if layer.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        code,
        Json(ApiResponse::ok(HealthResponse {
            status: layer.status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            layer,
        })),
    )
}

async fn lock_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<LockStatusResponse> {
    if let Err(e) = validate_id("resource_id", &id) {
        return bad_request(e);
    }
    let locked = state.locks().is_locked(&id).await;
    (
        StatusCode::OK,
        Json(ApiResponse::ok(LockStatusResponse {
            resource_id: id,
            locked,
        })),
    )
}

async fn force_release_lock(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<ForceReleaseResponse> {
    if let Err(e) = validate_id("resource_id", &id) {
        return bad_request(e);
    }
    let removed = state.locks().force_release(&id).await;
    tracing::info!(resource_id = %id, removed, "Lock force-released by operator");
    (
        StatusCode::OK,
        Json(ApiResponse::ok(ForceReleaseResponse {
            resource_id: id,
            removed,
        })),
    )
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<SessionResponse> {
    if let Err(e) = validate_id("session_id", &id) {
        return bad_request(e);
    }
    match state.sessions().get(&id).await {
        Some(binding) => (StatusCode::OK, Json(ApiResponse::ok(binding.into()))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::err(format!("Session '{}' not found", id))),
        ),
    }
}

async fn session_by_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Reply<String> {
    if let Err(e) = validate_id("agent_id", &agent_id) {
        return bad_request(e);
    }
    match state.sessions().get_by_agent_id(&agent_id).await {
        Some(session_id) => (StatusCode::OK, Json(ApiResponse::ok(session_id))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::err(format!("No session bound to agent '{}'", agent_id))),
        ),
    }
}

async fn unbind_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<UnbindResponse> {
    if let Err(e) = validate_id("session_id", &id) {
        return bad_request(e);
    }
    let removed = state.sessions().unbind(&id).await;
    tracing::info!(session_id = %id, removed, "Session unbound by operator");
    (
        StatusCode::OK,
        Json(ApiResponse::ok(UnbindResponse {
            session_id: id,
            removed,
        })),
    )
}

async fn rate_limit_count(
    State(state): State<AppState>,
    Path((operation, resource_id)): Path<(String, String)>,
    Query(query): Query<RateLimitQuery>,
) -> Reply<RateLimitCountResponse> {
    let window = match validate_id("operation", &operation)
        .and_then(|_| validate_id("resource_id", &resource_id))
        .and_then(|_| query.window())
    {
        Ok(window) => window,
        Err(e) => return bad_request(e),
    };
    let count = state
        .rate_limiter()
        .get_count(&resource_id, window, &operation)
        .await;
    (
        StatusCode::OK,
        Json(ApiResponse::ok(RateLimitCountResponse {
            operation,
            resource_id,
            window_secs: window.as_secs(),
            count,
        })),
    )
}

async fn reset_rate_limit(
    State(state): State<AppState>,
    Path((operation, resource_id)): Path<(String, String)>,
) -> Reply<ResetResponse> {
    if let Err(e) = validate_id("operation", &operation)
        .and_then(|_| validate_id("resource_id", &resource_id))
    {
        return bad_request(e);
    }
    let reset = state.rate_limiter().reset(&resource_id, &operation).await;
    tracing::info!(%operation, %resource_id, reset, "Rate limit reset by operator");
    (StatusCode::OK, Json(ApiResponse::ok(ResetResponse { reset })))
}

async fn invalidate_metadata(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Reply<InvalidateResponse> {
    if let Err(e) = validate_id("agent_id", &agent_id) {
        return bad_request(e);
    }
    let removed = usize::from(state.metadata().invalidate(&agent_id).await);
    (StatusCode::OK, Json(ApiResponse::ok(InvalidateResponse { removed })))
}

async fn invalidate_all_metadata(State(state): State<AppState>) -> Reply<InvalidateResponse> {
    let removed = state.metadata().invalidate_all().await;
    (StatusCode::OK, Json(ApiResponse::ok(InvalidateResponse { removed })))
}

// ─── Storage Backend Selection ──────────────────────────────────────────────

/// Builds the client, falling back to in-memory storage if the configured
/// backend cannot be opened.
pub fn create_client(config: ResilienceConfig) -> ResilienceClient {
    match ResilienceClient::from_config(config.clone()) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(
                backend = ?config.storage_backend,
                error = %e,
                "Failed to open storage backend"
            );
            tracing::warn!("Falling back to in-memory storage");
            let config = ResilienceConfig {
                storage_backend: StorageSelector::Memory,
                ..config
            };
            let gateway = Arc::new(bastion_core::client::build_gateway(&config));
            ResilienceClient::new(
                config,
                gateway,
                Arc::new(bastion_core::infrastructure_in_memory::InMemoryBackend::new()),
                Arc::new(bastion_core::time::SystemClock),
            )
        }
    }
}
