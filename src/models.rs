use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

/// Directory name under the storage root where all image files live.
pub const IMAGES_DIR: &str = "dr_images";

// --- Core Application Schemas (Mapped to Database) ---

/// Territory
///
/// A geographic/administrative unit from the `territories` table. The `code`
/// is unique and immutable in practice: stored file paths are derived from it
/// and the provisioning utility seeds one login username per code.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Territory {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub region: String,
    pub zone: String,
}

/// TerritorySummary
///
/// A territory row annotated with the count of *distinct* doctors holding
/// image sets in it. The count is derived per request, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct TerritorySummary {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub region: String,
    pub zone: String,
    pub doctor_count: i64,
}

/// ImageSet
///
/// The three-generation photo record for one doctor within one territory,
/// from the `image_sets` table. Each image column holds the file's stored
/// path relative to the storage root, or NULL when that image was never
/// provided. `uploaded_at` is set once on insert and never modified.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct ImageSet {
    pub id: Uuid,
    // FK to territories.id (owner). Deleting the territory cascades here.
    pub territory_id: Uuid,
    // Unique across the whole system, not just the territory.
    pub doctor_id: String,
    pub doctor_name: String,
    pub self_image: Option<String>,
    pub parents_image: Option<String>,
    pub children_image: Option<String>,
    #[ts(type = "string")]
    pub uploaded_at: DateTime<Utc>,
}

/// Account
///
/// A login identity from the `accounts` table. Internal only: the password
/// hash must never reach a response body, so this type is not serializable.
#[derive(Debug, Clone, FromRow, Default)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    // 'admin' or 'territory'. Role is a column, never derived from the username shape.
    pub role: String,
    // Explicit link for territory-role accounts; NULL for admins.
    pub territory_id: Option<Uuid>,
}

// --- Request Payloads (Input Schemas) ---

/// NewTerritory
///
/// Input for registering a territory (provisioning / seeding path).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct NewTerritory {
    pub code: String,
    pub name: String,
    pub region: String,
    pub zone: String,
}

/// NewImageSet
///
/// Repository input for the image-set create operation. The image fields
/// carry the already-derived relative storage paths.
#[derive(Debug, Clone, Default)]
pub struct NewImageSet {
    pub territory_id: Uuid,
    pub doctor_id: String,
    pub doctor_name: String,
    pub self_image: Option<String>,
    pub parents_image: Option<String>,
    pub children_image: Option<String>,
}

/// NewAccount
///
/// Repository input for account creation (provisioning utility).
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub territory_id: Option<Uuid>,
}

/// LoginRequest
///
/// Credential submission payload for POST /accounts/login/.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// SearchRequest
///
/// Search-by-code payload for POST /territories/.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SearchRequest {
    pub code: String,
}

// --- Response Schemas (Output) ---

/// LoginResponse
///
/// Successful login: the bearer token plus the role-appropriate landing page
/// (admins go to the directory, territory accounts to the upload form).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub role: String,
    pub landing: String,
}

/// UploadResponse
///
/// Confirmation for a successful upload, naming the doctor and doctor_id.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UploadResponse {
    pub message: String,
    pub image_set: ImageSet,
}

/// DirectoryPage
///
/// One page of the territory directory. `message` carries the not-found note
/// when a searched code did not match (the caller stays on the list view).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct DirectoryPage {
    pub territories: Vec<TerritorySummary>,
    pub page: i64,
    pub page_count: i64,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// TerritoryDetail
///
/// Detail view: the territory's descriptive fields plus its full doctor
/// roster with image references.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct TerritoryDetail {
    pub territory: Territory,
    pub image_sets: Vec<ImageSet>,
}

// --- Image Path Derivation ---

/// ImageRole
///
/// Which of the three generations an uploaded file represents. The suffix
/// feeds the derived filename and must match the historical layout exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    /// The doctor's own photo. No filename suffix.
    Own,
    /// The doctor's parents' photo.
    Parents,
    /// The doctor's children's photo.
    Children,
}

impl ImageRole {
    pub fn suffix(self) -> &'static str {
        match self {
            ImageRole::Own => "",
            ImageRole::Parents => "parent",
            ImageRole::Children => "children",
        }
    }

    /// The multipart field name carrying this image in the upload form.
    pub fn field_name(self) -> &'static str {
        match self {
            ImageRole::Own => "self_image",
            ImageRole::Parents => "parents_image",
            ImageRole::Children => "children_image",
        }
    }
}

/// Derives the stored path for an image, relative to the storage root.
///
/// Layout (compatibility-critical, reproduced exactly):
/// `dr_images/<code>/<doctor_id> - <doctor_name>/<code>_<doctor_id>_<doctor_name>_<role><ext>`
/// where `<ext>` is the original filename's extension including the leading
/// dot, or empty if the filename has none.
pub fn image_relative_path(
    territory_code: &str,
    doctor_id: &str,
    doctor_name: &str,
    role: ImageRole,
    original_filename: &str,
) -> String {
    let ext = std::path::Path::new(original_filename)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    let doctor_folder = format!("{doctor_id} - {doctor_name}");
    let filename = format!(
        "{territory_code}_{doctor_id}_{doctor_name}_{}{ext}",
        role.suffix()
    );

    format!("{IMAGES_DIR}/{territory_code}/{doctor_folder}/{filename}")
}
