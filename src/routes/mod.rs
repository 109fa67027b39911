//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One websocket endpoint per board plus two plain HTTP probes. CORS is
//! driven by `CORS_ALLOWED_ORIGINS`; a lone `*` opens it to any origin,
//! otherwise only the listed origins are allowed, with credentials.

pub mod ws;

use axum::Router;
use axum::http::{HeaderValue, StatusCode};
use axum::response::Json;
use axum::routing::get;
use serde_json::{Value, json};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::state::AppState;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/ws/{board_id}", get(ws::handle_ws))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.allows_any_origin() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "cors: ignoring unusable origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Whiteboard API is running" }))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
