use crate::{AppState, handlers};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Ceiling for a single upload request: three images plus form fields.
const UPLOAD_BODY_LIMIT: usize = 25 * 1024 * 1024;

/// Authenticated Router Module
///
/// Routes reachable by any logged-in account, admin or territory. The
/// `AuthUser` extractor middleware on the layer above guarantees every
/// handler here receives a resolved identity; territory-scoping decisions
/// (which territory an upload lands in) happen inside the upload handler.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /upload
        // Form support data: the territory list for admins, the caller's own
        // territory for territory accounts.
        // POST /upload
        // Multipart submission of a doctor's three-generation image set.
        .route(
            "/upload",
            get(handlers::upload_form).post(handlers::upload),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        // GET /accounts/logout/
        // Revokes the presented session token.
        .route("/accounts/logout/", get(handlers::logout))
}
