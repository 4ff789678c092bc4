//! Shared-secret check for the WebSocket route.
//!
//! # Token Extraction
//!
//! 1. **Authorization header**: `Authorization: Bearer <token>`
//! 2. **Query parameter**: `?token=<token>`, for browser clients that cannot
//!    set headers on a WebSocket upgrade
//!
//! The header wins when both are present. A missing or wrong token gets
//! `401 Unauthorized` before the upgrade happens.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::SharedState;

fn extract_bearer_token<B>(req: &axum::http::Request<B>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Find `token=<value>` in the query string.
///
/// - `/ws?token=abc123` -> Some("abc123")
/// - `/ws?foo=bar&token=abc123` -> Some("abc123")
/// - `/ws?foo=bar` -> None
fn extract_query_token<B>(req: &axum::http::Request<B>) -> Option<String> {
    req.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token").then(|| value.to_string())
        })
    })
}

pub async fn auth_middleware(
    State(state): State<Arc<SharedState>>,
    req: Request,
    next: Next,
) -> Response {
    let query_token = extract_query_token(&req);
    let token = extract_bearer_token(&req).or(query_token.as_deref());

    if state.validate_token(token) {
        next.run(req).await
    } else {
        log::debug!("Rejected connection with invalid token");
        (StatusCode::UNAUTHORIZED, "Invalid or missing authentication token").into_response()
    }
}
