//! Router for the bridge.
//!
//! - `GET /ws`: WebSocket upgrade, requires the shared secret
//! - `GET /token`: the shared secret as `text/plain`, open to any origin
//! - anything else: liveness, answers `OK`

use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::auth_middleware;
use crate::state::SharedState;
use crate::websocket::ws_handler;

pub fn router(state: Arc<SharedState>) -> Router {
    let mut app = Router::new().route(
        "/ws",
        get(ws_handler).route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        )),
    );

    if state.config.serve_token_endpoint {
        app = app.route(
            "/token",
            get(token_handler).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        );
    }

    app.fallback(liveness).with_state(state)
}

/// Handler for GET /token
async fn token_handler(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.config.token.clone().unwrap_or_default(),
    )
}

async fn liveness() -> &'static str {
    "OK"
}
