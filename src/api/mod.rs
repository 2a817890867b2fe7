//! Edge server
//!
//! Serves the built site directory behind the route guard:
//! - `GET /healthz` health status
//! - everything else from the site directory, with unknown files falling
//!   back to `index.html` so the client router can take over

pub mod middleware;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::path::Path;
use tower_http::{
    compression::CompressionLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

pub use middleware::{extract_access_token, AppState};

/// Build the complete router with middleware
pub fn build_router(state: AppState, site_dir: &Path) -> Router {
    let site = ServeDir::new(site_dir).fallback(ServeFile::new(site_dir.join("index.html")));

    Router::new()
        .route("/healthz", get(middleware::health))
        .fallback_service(site)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::route_guard,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::test_tokens::token_expiring_in;
    use crate::auth::token::TokenValidator;
    use crate::config::Config;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>app</html>").unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets").join("app.js"), "console.log(1)").unwrap();
        dir
    }

    fn app(site: &TempDir) -> Router {
        let state = AppState::from_config(&Config::default(), Arc::new(TokenValidator::new())).unwrap();
        build_router(state, site.path())
    }

    async fn get_path(app: Router, path: &str, token: Option<&str>) -> Response {
        let mut request = Request::builder().uri(path);
        if let Some(token) = token {
            request = request.header(header::COOKIE, format!("access_token={}", token));
        }
        app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_anonymous_dashboard_redirects_to_login() {
        let site = site();
        let response = get_path(app(&site), "/dashboard/events", None).await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(location(&response), "/login?redirect=%2Fdashboard%2Fevents");
    }

    #[tokio::test]
    async fn test_signed_in_dashboard_serves_app() {
        let site = site();
        let token = token_expiring_in(600);
        let response = get_path(app(&site), "/dashboard", Some(&token)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<html>app</html>");
    }

    #[tokio::test]
    async fn test_bearer_header_is_accepted() {
        let site = site();
        let request = Request::builder()
            .uri("/wallet")
            .header(header::AUTHORIZATION, format!("Bearer {}", token_expiring_in(600)))
            .body(Body::empty())
            .unwrap();

        let response = app(&site).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_expired_token_is_treated_as_anonymous() {
        let site = site();
        let token = token_expiring_in(-600);
        let response = get_path(app(&site), "/profile", Some(&token)).await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(location(&response), "/login?redirect=%2Fprofile");
    }

    #[tokio::test]
    async fn test_signed_in_login_redirects_to_dashboard() {
        let site = site();
        let token = token_expiring_in(600);
        let response = get_path(app(&site), "/login", Some(&token)).await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(location(&response), "/dashboard");
    }

    #[tokio::test]
    async fn test_unknown_path_redirects_to_unauthorized() {
        let site = site();
        let response = get_path(app(&site), "/definitely-not-a-page", None).await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(location(&response), "/unauthorized");
    }

    #[tokio::test]
    async fn test_public_pages_are_served() {
        let site = site();
        let response = get_path(app(&site), "/events/summer-fest", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_path(app(&site), "/login", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_assets_bypass_the_guard() {
        let site = site();
        let response = get_path(app(&site), "/assets/app.js", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "console.log(1)");
    }

    #[tokio::test]
    async fn test_healthz() {
        let site = site();
        let response = get_path(app(&site), "/healthz", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }
}
