// chat_service/src/api/mod.rs

//! HTTP 路由。
//!
//! REST 回退接口挂载在 `/messages` 下，WebSocket 入口为 `/ws`，`/health` 不需要鉴权。
//! 所有路由共用按来源 IP 的限流。

pub mod conversation_handler;
pub mod rate_limit;

use axum::{
    extract::State,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    middleware,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use log::{error, warn};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::state::AppState;
use crate::ws_server::service;

/// 组装完整的路由。
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.server.allowed_origins);
    Router::new()
        .nest("/messages", conversation_handler::routes())
        .route("/ws", get(service::ws_handler))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(middleware::from_fn_with_state(state.clone(), rate_limit::enforce_rate_limit)),
        )
        .with_state(state)
}

/// `GET /health`：存储不可用时返回 503。
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let timestamp = Utc::now().to_rfc3339();
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": timestamp,
                "uptime": state.started_at.elapsed().as_secs_f64(),
                "onlineUsers": state.connection_manager.online_count(),
            })),
        ),
        Err(e) => {
            error!("[API] 健康检查失败，存储不可用: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "timestamp": timestamp })),
            )
        }
    }
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let headers = [AUTHORIZATION, CONTENT_TYPE];

    if allowed_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new().allow_origin(Any).allow_methods(methods).allow_headers(headers);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("[API] 忽略无效的跨域来源 '{}': {}", origin, e);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
