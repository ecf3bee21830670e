use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Admin Router Module
///
/// The directory, detail, and export surface. The authentication middleware
/// on the layer above guarantees a session; the admin role itself is checked
/// inside each handler, mirroring how the rest of the authorization logic
/// reads the resolved `AuthUser`.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /territories/?page=&code=
        // Paginated directory with derived distinct-doctor counts; the `code`
        // parameter performs search-by-code (redirect on match).
        // POST /territories/
        // Form-style search-by-code with the same redirect-or-message contract.
        .route(
            "/territories/",
            get(handlers::territory_directory).post(handlers::search_territory),
        )
        // GET /territory/{code}/
        // Detail view: territory fields plus its full image-set roster.
        .route("/territory/{code}/", get(handlers::territory_detail))
        // GET /download/all
        // One ZIP archive of the entire image store, hierarchy preserved.
        .route("/download/all", get(handlers::download_all))
}
