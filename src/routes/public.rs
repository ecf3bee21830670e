use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// The only anonymous surface. Per the access contract, nothing is reachable
/// without a session except login itself and the root, which redirects there.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated probe for monitoring and load balancer checks.
        .route("/health", get(|| async { "ok" }))
        // GET /
        // The root redirects straight to the login page.
        .route("/", get(handlers::home))
        // GET/POST /accounts/login/
        // Credential submission. Success issues a session token and names the
        // role-appropriate landing page.
        .route(
            "/accounts/login/",
            get(handlers::login_page).post(handlers::login),
        )
}
