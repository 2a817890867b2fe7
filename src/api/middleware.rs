//! Edge middleware
//!
//! Applies the route decisions in front of the static site:
//! - Bypass (static assets and API proxies pass straight through)
//! - Access token extraction (Bearer header or cookie)
//! - Redirects derived from `RouteClassifier::redirect_target`

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::routes::{PathMatcher, RouteClassifier, RouteError};
use crate::auth::token::TokenValidator;
use crate::config::Config;

/// Shared state of the edge server
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<RouteClassifier>,
    pub validator: Arc<TokenValidator>,
    pub bypass: Arc<PathMatcher>,
    /// Name of the cookie that may carry the access token
    pub token_cookie: Arc<str>,
    pub started_at: Instant,
}

impl AppState {
    pub fn from_config(config: &Config, validator: Arc<TokenValidator>) -> Result<Self, RouteError> {
        Ok(Self {
            classifier: Arc::new(RouteClassifier::new(&config.routes, &config.redirects)?),
            validator,
            bypass: Arc::new(PathMatcher::new(&config.routes.bypass)?),
            token_cookie: Arc::from(config.auth.token_cookie.as_str()),
            started_at: Instant::now(),
        })
    }
}

/// Extract the access token from a request.
///
/// The `Authorization: Bearer` header wins over the cookie.
pub fn extract_access_token(request: &Request, cookie_name: &str) -> Option<String> {
    if let Some(auth_header) = request.headers().get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    for cookie_header in request.headers().get_all(header::COOKIE) {
        let Ok(cookie_str) = cookie_header.to_str() else {
            continue;
        };
        for cookie in cookie_str.split(';') {
            let Some((name, value)) = cookie.trim().split_once('=') else {
                continue;
            };
            if name == cookie_name && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// Route guard middleware
///
/// Sends anonymous visitors of protected pages to login, signed-in users
/// away from auth pages, and unknown paths to the unauthorized page.
pub async fn route_guard(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if state.bypass.matches(&path) {
        return next.run(request).await;
    }

    let is_authenticated = match extract_access_token(&request, &state.token_cookie) {
        Some(token) => state.validator.validate(&token).await,
        None => false,
    };

    if let Some(target) = state.classifier.redirect_target(&path, is_authenticated) {
        tracing::debug!(path = %path, target = %target, is_authenticated, "Redirecting");
        return Redirect::temporary(&target).into_response();
    }

    next.run(request).await
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// GET /healthz
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
