use crate::{
    AppState,
    auth::{self, AuthUser},
    config::DIRECTORY_PAGE_SIZE,
    error::PortalError,
    models::{
        DirectoryPage, ImageRole, LoginRequest, LoginResponse, NewImageSet, SearchRequest,
        Territory, TerritoryDetail, UploadResponse, image_relative_path,
    },
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;

// --- Filter Structs ---

/// DirectoryQuery
///
/// Accepted query parameters for the territory directory. `code` carries the
/// search-by-code input; `page` selects the directory page.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct DirectoryQuery {
    pub page: Option<i64>,
    pub code: Option<String>,
}

// --- Auth Handlers ---

/// login_page
///
/// [Public Route] GET side of the login endpoint. The JSON API equivalent of
/// rendering the login form.
#[utoipa::path(
    get,
    path = "/accounts/login/",
    responses((status = 200, description = "Login form"))
)]
pub async fn login_page() -> Json<serde_json::Value> {
    Json(json!({ "message": "Submit username and password to /accounts/login/." }))
}

/// login
///
/// [Public Route] Verifies credentials and establishes a session. The role
/// comes from the account record, never from the username shape, and decides
/// the landing page: admins get the territory directory, territory accounts
/// get the upload form.
#[utoipa::path(
    post,
    path = "/accounts/login/",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session established", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, PortalError> {
    let account = state
        .repo
        .get_account_by_username(&payload.username)
        .await?
        .ok_or(PortalError::AuthFailure)?;

    if !auth::verify_password(&payload.password, &account.password_hash) {
        return Err(PortalError::AuthFailure);
    }

    let (token, _jti) = auth::issue_token(account.id, &state.config.jwt_secret)?;

    let landing = if account.role == "admin" {
        "/territories/"
    } else {
        "/upload"
    };

    tracing::info!(username = %account.username, role = %account.role, "login succeeded");

    Ok(Json(LoginResponse {
        token,
        role: account.role,
        landing: landing.to_string(),
    }))
}

/// logout
///
/// [Authenticated Route] Terminates the session by revoking the token's jti.
/// Any later request presenting the same token is rejected.
#[utoipa::path(
    get,
    path = "/accounts/logout/",
    responses((status = 200, description = "Session terminated"))
)]
pub async fn logout(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, PortalError> {
    if !auth_user.session.is_nil() {
        state.repo.revoke_session(auth_user.session).await?;
    }
    tracing::info!(username = %auth_user.username, "logout");
    Ok(Json(json!({ "message": "Logged out." })))
}

/// home
///
/// [Public Route] The root redirects to the login page; nothing is reachable
/// anonymously except login itself.
pub async fn home() -> Redirect {
    Redirect::to("/accounts/login/")
}

// --- Upload Handlers ---

/// The parsed multipart upload form. Files carry their original filename and
/// full byte content.
struct UploadForm {
    territory_code: Option<String>,
    doctor_id: String,
    doctor_name: String,
    files: Vec<(ImageRole, String, Vec<u8>)>,
}

impl UploadForm {
    async fn from_multipart(multipart: &mut Multipart) -> Result<Self, PortalError> {
        let mut form = UploadForm {
            territory_code: None,
            doctor_id: String::new(),
            doctor_name: String::new(),
            files: Vec::new(),
        };

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| PortalError::InvalidInput(e.to_string()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match name.as_str() {
                "territory" => {
                    form.territory_code = Some(
                        field
                            .text()
                            .await
                            .map_err(|e| PortalError::InvalidInput(e.to_string()))?,
                    );
                }
                "doctor_id" => {
                    form.doctor_id = field
                        .text()
                        .await
                        .map_err(|e| PortalError::InvalidInput(e.to_string()))?;
                }
                "doctor_name" => {
                    form.doctor_name = field
                        .text()
                        .await
                        .map_err(|e| PortalError::InvalidInput(e.to_string()))?;
                }
                other => {
                    let Some(role) = [ImageRole::Own, ImageRole::Parents, ImageRole::Children]
                        .into_iter()
                        .find(|r| r.field_name() == other)
                    else {
                        continue;
                    };

                    // A file input submitted empty arrives with no filename or
                    // no bytes; treat it as absent.
                    let filename = field.file_name().map(str::to_string).unwrap_or_default();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| PortalError::InvalidInput(e.to_string()))?;
                    if filename.is_empty() || bytes.is_empty() {
                        continue;
                    }
                    form.files.push((role, filename, bytes.to_vec()));
                }
            }
        }

        Ok(form)
    }
}

/// Rejects doctor fields that would escape the derived folder layout.
fn validate_path_segment(value: &str, field: &str) -> Result<(), PortalError> {
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(PortalError::InvalidInput(format!(
            "{field} must not contain path separators"
        )));
    }
    Ok(())
}

/// upload_form
///
/// [Authenticated Route] GET side of the upload endpoint. Admins receive the
/// full territory list for the selection control; territory accounts receive
/// only their own territory.
#[utoipa::path(
    get,
    path = "/upload",
    responses((status = 200, description = "Upload form data", body = [Territory]))
)]
pub async fn upload_form(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Territory>>, PortalError> {
    if auth_user.is_admin() {
        return Ok(Json(state.repo.list_territories().await?));
    }

    let territory_id = auth_user.territory_id.ok_or(PortalError::Forbidden)?;
    let territory = state
        .repo
        .get_territory(territory_id)
        .await?
        .ok_or_else(|| PortalError::NotFound("territory".to_string()))?;
    Ok(Json(vec![territory]))
}

/// upload
///
/// [Authenticated Route] Submits a new three-generation image set.
///
/// Territory resolution: admins name the target territory explicitly;
/// territory accounts always act on their linked territory and are rejected
/// if the form names a different one. Validation order follows the create
/// contract: territory existence, required fields, capacity, uniqueness.
///
/// Files are written to storage only after the database row commits; a failed
/// write rolls the record back (compensating cleanup) so the store and the
/// registry cannot drift apart silently.
#[utoipa::path(
    post,
    path = "/upload",
    responses(
        (status = 200, description = "Image set created", body = UploadResponse),
        (status = 400, description = "Missing or invalid fields"),
        (status = 404, description = "Unknown territory"),
        (status = 409, description = "Capacity exceeded or doctor id conflict")
    )
)]
pub async fn upload(
    auth_user: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, PortalError> {
    let form = UploadForm::from_multipart(&mut multipart).await?;

    let territory = if auth_user.is_admin() {
        let code = form
            .territory_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PortalError::InvalidInput("territory selection is required".into()))?;
        state
            .repo
            .get_territory_by_code(code)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("territory '{code}'")))?
    } else {
        // Territory accounts upload for their own territory, full stop.
        let territory_id = auth_user.territory_id.ok_or(PortalError::Forbidden)?;
        let territory = state
            .repo
            .get_territory(territory_id)
            .await?
            .ok_or_else(|| PortalError::NotFound("territory".to_string()))?;

        if let Some(code) = form.territory_code.as_deref().map(str::trim) {
            if !code.is_empty() && code != territory.code {
                return Err(PortalError::InvalidInput(
                    "cannot upload for another territory".into(),
                ));
            }
        }
        territory
    };

    let doctor_id = form.doctor_id.trim().to_string();
    let doctor_name = form.doctor_name.trim().to_string();
    if doctor_id.is_empty() || doctor_name.is_empty() {
        return Err(PortalError::InvalidInput(
            "doctor_id and doctor_name are required".into(),
        ));
    }
    validate_path_segment(&doctor_id, "doctor_id")?;
    validate_path_segment(&doctor_name, "doctor_name")?;

    if state.config.require_all_images && form.files.len() != 3 {
        return Err(PortalError::InvalidInput(
            "all three images (self, parents, children) are required".into(),
        ));
    }

    let mut new_set = NewImageSet {
        territory_id: territory.id,
        doctor_id: doctor_id.clone(),
        doctor_name: doctor_name.clone(),
        ..Default::default()
    };

    let mut writes: Vec<(String, Vec<u8>)> = Vec::with_capacity(form.files.len());
    for (role, filename, bytes) in form.files {
        let path = image_relative_path(&territory.code, &doctor_id, &doctor_name, role, &filename);
        match role {
            ImageRole::Own => new_set.self_image = Some(path.clone()),
            ImageRole::Parents => new_set.parents_image = Some(path.clone()),
            ImageRole::Children => new_set.children_image = Some(path.clone()),
        }
        writes.push((path, bytes));
    }

    let image_set = state
        .repo
        .create_image_set(new_set, state.config.reupload_policy)
        .await?;

    // Record first, files second. On a failed write, remove whatever landed
    // and take the fresh record back out so no dangling references remain.
    for (index, (path, bytes)) in writes.iter().enumerate() {
        if let Err(e) = state.storage.save(path, bytes).await {
            tracing::error!("image write failed for {path}: {e}");
            for (earlier, _) in &writes[..index] {
                let _ = state.storage.remove(earlier).await;
            }
            let _ = state.repo.delete_image_set(image_set.id).await;
            return Err(e);
        }
    }

    tracing::info!(
        territory = %territory.code,
        doctor_id = %doctor_id,
        files = writes.len(),
        "image set uploaded"
    );

    Ok(Json(UploadResponse {
        message: format!("Images for {doctor_name} (ID: {doctor_id}) uploaded successfully."),
        image_set,
    }))
}

// --- Directory Handlers ---

async fn directory_page(
    state: &AppState,
    page: i64,
    message: Option<String>,
) -> Result<DirectoryPage, PortalError> {
    let mut directory = state
        .repo
        .territory_directory(page, DIRECTORY_PAGE_SIZE)
        .await?;
    directory.message = message;
    Ok(directory)
}

/// territory_directory
///
/// [Admin Route] Paginated territory directory with optional search-by-code.
/// An exact code match redirects to the detail view; an unknown code keeps
/// the caller on the list with a not-found message rather than erroring.
#[utoipa::path(
    get,
    path = "/territories/",
    params(DirectoryQuery),
    responses(
        (status = 200, description = "Directory page", body = DirectoryPage),
        (status = 303, description = "Search matched; redirect to detail")
    )
)]
pub async fn territory_directory(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Result<Response, PortalError> {
    if !auth_user.is_admin() {
        return Err(PortalError::Forbidden);
    }

    let page = query.page.unwrap_or(1);

    if let Some(code) = query.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        if state.repo.get_territory_by_code(code).await?.is_some() {
            return Ok(Redirect::to(&format!("/territory/{code}/")).into_response());
        }
        let directory = directory_page(
            &state,
            page,
            Some(format!("Territory '{code}' not found.")),
        )
        .await?;
        return Ok(Json(directory).into_response());
    }

    let directory = directory_page(&state, page, None).await?;
    Ok(Json(directory).into_response())
}

/// search_territory
///
/// [Admin Route] POST side of the directory search. Same contract as the GET
/// query: match redirects, miss reports and stays on the list.
#[utoipa::path(
    post,
    path = "/territories/",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "No match; directory with message", body = DirectoryPage),
        (status = 303, description = "Match; redirect to detail")
    )
)]
pub async fn search_territory(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> Result<Response, PortalError> {
    if !auth_user.is_admin() {
        return Err(PortalError::Forbidden);
    }

    let code = payload.code.trim();
    if code.is_empty() {
        return Err(PortalError::InvalidInput("search code is required".into()));
    }

    if state.repo.get_territory_by_code(code).await?.is_some() {
        return Ok(Redirect::to(&format!("/territory/{code}/")).into_response());
    }

    let directory = directory_page(&state, 1, Some(format!("Territory '{code}' not found."))).await?;
    Ok(Json(directory).into_response())
}

/// territory_detail
///
/// [Admin Route] A territory's descriptive fields plus its full image-set
/// roster. Unknown codes yield 404.
#[utoipa::path(
    get,
    path = "/territory/{code}/",
    params(("code" = String, Path, description = "Territory code")),
    responses(
        (status = 200, description = "Territory detail", body = TerritoryDetail),
        (status = 404, description = "Unknown territory code")
    )
)]
pub async fn territory_detail(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<TerritoryDetail>, PortalError> {
    if !auth_user.is_admin() {
        return Err(PortalError::Forbidden);
    }

    let territory = state
        .repo
        .get_territory_by_code(&code)
        .await?
        .ok_or_else(|| PortalError::NotFound(format!("territory '{code}'")))?;

    let image_sets = state.repo.image_sets_for_territory(territory.id).await?;

    Ok(Json(TerritoryDetail {
        territory,
        image_sets,
    }))
}

// --- Export Handler ---

/// download_all
///
/// [Admin Route] Streams the whole image store as one ZIP archive whose entry
/// names preserve the `dr_images/...` hierarchy. A missing images root is an
/// informational not-found, never an empty or corrupt archive.
#[utoipa::path(
    get,
    path = "/download/all",
    responses(
        (status = 200, description = "ZIP archive of all images"),
        (status = 404, description = "Images root missing")
    )
)]
pub async fn download_all(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Response, PortalError> {
    if !auth_user.is_admin() {
        return Err(PortalError::Forbidden);
    }

    let archive = state.storage.export_archive().await?;

    tracing::info!(bytes = archive.len(), "image archive exported");

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"dr_images.zip\"",
            ),
        ],
        archive,
    )
        .into_response())
}
