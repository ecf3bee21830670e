use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use threegen_portal::{
    AppConfig, AppState, MockImageStore, auth,
    config::ReuploadPolicy,
    create_router,
    error::PortalError,
    models::{
        Account, DirectoryPage, ImageSet, LoginRequest, LoginResponse, NewAccount, NewImageSet,
        NewTerritory, Territory, TerritoryDetail, TerritorySummary, UploadResponse,
    },
    repository::{Repository, RepositoryState, clamp_page, enforce_capacity},
    storage::{ImageStore, StorageState},
};
use tower::util::ServiceExt;
use uuid::Uuid;

// --- In-Memory Repository ---

/// In-memory Repository with the same capacity and uniqueness semantics as
/// the Postgres implementation, so handler tests exercise the full contract
/// without a database.
#[derive(Default)]
struct MockRepository {
    territories: Mutex<Vec<Territory>>,
    image_sets: Mutex<Vec<ImageSet>>,
    accounts: Mutex<Vec<Account>>,
    revoked: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl Repository for MockRepository {
    async fn create_territory(&self, req: NewTerritory) -> Result<Territory, PortalError> {
        let mut territories = self.territories.lock().unwrap();
        if territories.iter().any(|t| t.code == req.code) {
            return Err(PortalError::Conflict(req.code));
        }
        let territory = Territory {
            id: Uuid::new_v4(),
            code: req.code,
            name: req.name,
            region: req.region,
            zone: req.zone,
        };
        territories.push(territory.clone());
        Ok(territory)
    }

    async fn get_territory_by_code(&self, code: &str) -> Result<Option<Territory>, PortalError> {
        Ok(self
            .territories
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.code == code)
            .cloned())
    }

    async fn get_territory(&self, id: Uuid) -> Result<Option<Territory>, PortalError> {
        Ok(self
            .territories
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn list_territories(&self) -> Result<Vec<Territory>, PortalError> {
        let mut territories = self.territories.lock().unwrap().clone();
        territories.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(territories)
    }

    async fn territory_directory(
        &self,
        page: i64,
        page_size: i64,
    ) -> Result<DirectoryPage, PortalError> {
        let mut territories = self.territories.lock().unwrap().clone();
        territories.sort_by(|a, b| a.code.cmp(&b.code));
        let image_sets = self.image_sets.lock().unwrap().clone();

        let total = territories.len() as i64;
        let (page, page_count) = clamp_page(page, total, page_size);

        let start = ((page - 1) * page_size) as usize;
        let summaries = territories
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .map(|t| {
                let mut doctors: Vec<&str> = image_sets
                    .iter()
                    .filter(|i| i.territory_id == t.id)
                    .map(|i| i.doctor_id.as_str())
                    .collect();
                doctors.sort_unstable();
                doctors.dedup();
                TerritorySummary {
                    id: t.id,
                    code: t.code,
                    name: t.name,
                    region: t.region,
                    zone: t.zone,
                    doctor_count: doctors.len() as i64,
                }
            })
            .collect();

        Ok(DirectoryPage {
            territories: summaries,
            page,
            page_count,
            total,
            message: None,
        })
    }

    async fn create_image_set(
        &self,
        req: NewImageSet,
        policy: ReuploadPolicy,
    ) -> Result<ImageSet, PortalError> {
        if req.doctor_id.trim().is_empty() || req.doctor_name.trim().is_empty() {
            return Err(PortalError::InvalidInput(
                "doctor_id and doctor_name are required".to_string(),
            ));
        }

        let territory = self
            .get_territory(req.territory_id)
            .await?
            .ok_or_else(|| PortalError::NotFound("territory".to_string()))?;

        let mut image_sets = self.image_sets.lock().unwrap();

        let mut existing: Vec<String> = image_sets
            .iter()
            .filter(|i| i.territory_id == req.territory_id)
            .map(|i| i.doctor_id.clone())
            .collect();
        existing.sort();
        existing.dedup();

        enforce_capacity(&existing, &req.doctor_id, &territory.code)?;

        if existing.contains(&req.doctor_id) {
            match policy {
                ReuploadPolicy::Reject => return Err(PortalError::Conflict(req.doctor_id)),
                ReuploadPolicy::Upsert => {
                    let set = image_sets
                        .iter_mut()
                        .find(|i| i.doctor_id == req.doctor_id)
                        .unwrap();
                    set.doctor_name = req.doctor_name;
                    if req.self_image.is_some() {
                        set.self_image = req.self_image;
                    }
                    if req.parents_image.is_some() {
                        set.parents_image = req.parents_image;
                    }
                    if req.children_image.is_some() {
                        set.children_image = req.children_image;
                    }
                    return Ok(set.clone());
                }
            }
        }

        // doctor_id is globally unique across territories.
        if image_sets.iter().any(|i| i.doctor_id == req.doctor_id) {
            return Err(PortalError::Conflict(req.doctor_id));
        }

        let set = ImageSet {
            id: Uuid::new_v4(),
            territory_id: req.territory_id,
            doctor_id: req.doctor_id,
            doctor_name: req.doctor_name,
            self_image: req.self_image,
            parents_image: req.parents_image,
            children_image: req.children_image,
            uploaded_at: Utc::now(),
        };
        image_sets.push(set.clone());
        Ok(set)
    }

    async fn image_sets_for_territory(
        &self,
        territory_id: Uuid,
    ) -> Result<Vec<ImageSet>, PortalError> {
        Ok(self
            .image_sets
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.territory_id == territory_id)
            .cloned()
            .collect())
    }

    async fn delete_image_set(&self, id: Uuid) -> Result<bool, PortalError> {
        let mut image_sets = self.image_sets.lock().unwrap();
        let before = image_sets.len();
        image_sets.retain(|i| i.id != id);
        Ok(image_sets.len() < before)
    }

    async fn create_account(&self, req: NewAccount) -> Result<Account, PortalError> {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.iter().any(|a| a.username == req.username) {
            return Err(PortalError::Conflict(req.username));
        }
        let account = Account {
            id: Uuid::new_v4(),
            username: req.username,
            password_hash: req.password_hash,
            role: req.role,
            territory_id: req.territory_id,
        };
        accounts.push(account.clone());
        Ok(account)
    }

    async fn get_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, PortalError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, PortalError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn revoke_session(&self, jti: Uuid) -> Result<(), PortalError> {
        self.revoked.lock().unwrap().push(jti);
        Ok(())
    }

    async fn is_session_revoked(&self, jti: Uuid) -> Result<bool, PortalError> {
        Ok(self.revoked.lock().unwrap().contains(&jti))
    }
}

// --- Test Fixture ---

struct TestFixture {
    repo: Arc<MockRepository>,
    storage: Arc<MockImageStore>,
    config: AppConfig,
}

impl TestFixture {
    fn new() -> Self {
        Self {
            repo: Arc::new(MockRepository::default()),
            storage: Arc::new(MockImageStore::new()),
            config: AppConfig::default(),
        }
    }

    fn router(&self) -> axum::Router {
        let state = AppState {
            repo: self.repo.clone() as RepositoryState,
            storage: self.storage.clone() as StorageState,
            config: self.config.clone(),
        };
        create_router(state)
    }

    async fn seed_territory(&self, code: &str) -> Territory {
        self.repo
            .create_territory(NewTerritory {
                code: code.to_string(),
                name: format!("{code} Name"),
                region: "Region".to_string(),
                zone: "Zone".to_string(),
            })
            .await
            .unwrap()
    }

    async fn seed_account(&self, username: &str, role: &str, territory_id: Option<Uuid>) -> Account {
        self.repo
            .create_account(NewAccount {
                username: username.to_string(),
                password_hash: auth::hash_password("secret-pw").unwrap(),
                role: role.to_string(),
                territory_id,
            })
            .await
            .unwrap()
    }
}

const BOUNDARY: &str = "XTESTBOUNDARY";

/// Builds a multipart/form-data body from text fields and file parts.
fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (name, filename, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(user_id: Uuid, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header("x-user-id", user_id.to_string())
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// --- Auth Gate ---

#[tokio::test]
async fn test_root_redirects_to_login() {
    let fixture = TestFixture::new();
    let response = fixture
        .router()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/accounts/login/"
    );
}

#[tokio::test]
async fn test_protected_routes_reject_anonymous() {
    let fixture = TestFixture::new();
    for uri in ["/upload", "/territories/", "/download/all"] {
        let response = fixture
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "uri: {uri}");
    }
}

#[tokio::test]
async fn test_login_routes_by_role() {
    let fixture = TestFixture::new();
    let territory = fixture.seed_territory("T1").await;
    fixture.seed_account("admin", "admin", None).await;
    fixture
        .seed_account("T1", "territory", Some(territory.id))
        .await;

    for (username, expected_landing) in [("admin", "/territories/"), ("T1", "/upload")] {
        let payload = LoginRequest {
            username: username.to_string(),
            password: "secret-pw".to_string(),
        };
        let response = fixture
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/accounts/login/")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let login: LoginResponse = body_json(response).await;
        assert_eq!(login.landing, expected_landing);
        assert!(!login.token.is_empty());
    }
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let fixture = TestFixture::new();
    fixture.seed_account("admin", "admin", None).await;

    let payload = LoginRequest {
        username: "admin".to_string(),
        password: "wrong".to_string(),
    };
    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/accounts/login/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_invalidates_session() {
    let fixture = TestFixture::new();
    fixture.seed_account("admin", "admin", None).await;

    // Login to obtain a real token.
    let payload = LoginRequest {
        username: "admin".to_string(),
        password: "secret-pw".to_string(),
    };
    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/accounts/login/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&payload).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let login: LoginResponse = body_json(response).await;
    let bearer = format!("Bearer {}", login.token);

    // The token grants access before logout.
    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/territories/")
                .header(header::AUTHORIZATION, &bearer)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/accounts/logout/")
                .header(header::AUTHORIZATION, &bearer)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The revoked token never authenticates again.
    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/territories/")
                .header(header::AUTHORIZATION, &bearer)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// --- Upload ---

#[tokio::test]
async fn test_territory_account_upload_succeeds() {
    let fixture = TestFixture::new();
    let territory = fixture.seed_territory("T1").await;
    let account = fixture
        .seed_account("T1", "territory", Some(territory.id))
        .await;

    let body = multipart_body(
        &[("doctor_id", "D1"), ("doctor_name", "Alice")],
        &[("parents_image", "family.jpg", b"jpegbytes")],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(account.id, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let upload: UploadResponse = body_json(response).await;
    assert_eq!(
        upload.message,
        "Images for Alice (ID: D1) uploaded successfully."
    );
    assert_eq!(
        upload.image_set.parents_image.as_deref(),
        Some("dr_images/T1/D1 - Alice/T1_D1_Alice_parent.jpg")
    );
    assert!(upload.image_set.self_image.is_none());

    // The file landed in storage under the derived path.
    assert_eq!(
        fixture.storage.stored_paths(),
        vec!["dr_images/T1/D1 - Alice/T1_D1_Alice_parent.jpg".to_string()]
    );
}

#[tokio::test]
async fn test_territory_account_cannot_upload_elsewhere() {
    let fixture = TestFixture::new();
    let t1 = fixture.seed_territory("T1").await;
    fixture.seed_territory("T2").await;
    let account = fixture.seed_account("T1", "territory", Some(t1.id)).await;

    let body = multipart_body(
        &[
            ("territory", "T2"),
            ("doctor_id", "D1"),
            ("doctor_name", "Alice"),
        ],
        &[],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(account.id, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_upload_requires_territory_selection() {
    let fixture = TestFixture::new();
    fixture.seed_territory("T1").await;
    let admin = fixture.seed_account("admin", "admin", None).await;

    let body = multipart_body(&[("doctor_id", "D1"), ("doctor_name", "Alice")], &[]);
    let response = fixture
        .router()
        .oneshot(upload_request(admin.id, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown code fails with 404 rather than creating anything.
    let body = multipart_body(
        &[
            ("territory", "NOPE"),
            ("doctor_id", "D1"),
            ("doctor_name", "Alice"),
        ],
        &[],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(admin.id, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_requires_doctor_fields() {
    let fixture = TestFixture::new();
    let territory = fixture.seed_territory("T1").await;
    let account = fixture
        .seed_account("T1", "territory", Some(territory.id))
        .await;

    let body = multipart_body(&[("doctor_id", ""), ("doctor_name", "Alice")], &[]);
    let response = fixture
        .router()
        .oneshot(upload_request(account.id, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_third_distinct_doctor_is_rejected() {
    let fixture = TestFixture::new();
    let territory = fixture.seed_territory("T1").await;
    let admin = fixture.seed_account("admin", "admin", None).await;

    for doctor in ["D1", "D2"] {
        let body = multipart_body(
            &[
                ("territory", "T1"),
                ("doctor_id", doctor),
                ("doctor_name", "Doc"),
            ],
            &[],
        );
        let response = fixture
            .router()
            .oneshot(upload_request(admin.id, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "doctor: {doctor}");
    }

    // Two distinct doctors recorded; a third must be refused.
    let body = multipart_body(
        &[
            ("territory", "T1"),
            ("doctor_id", "D3"),
            ("doctor_name", "Doc"),
        ],
        &[],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(admin.id, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error: serde_json::Value = body_json(response).await;
    assert_eq!(error["kind"], "capacity_exceeded");

    let sets = fixture
        .repo
        .image_sets_for_territory(territory.id)
        .await
        .unwrap();
    let mut doctors: Vec<String> = sets.iter().map(|s| s.doctor_id.clone()).collect();
    doctors.sort();
    doctors.dedup();
    assert_eq!(doctors.len(), 2);
}

#[tokio::test]
async fn test_doctor_id_is_globally_unique() {
    let fixture = TestFixture::new();
    fixture.seed_territory("T1").await;
    fixture.seed_territory("T2").await;
    let admin = fixture.seed_account("admin", "admin", None).await;

    let body = multipart_body(
        &[
            ("territory", "T1"),
            ("doctor_id", "D1"),
            ("doctor_name", "Alice"),
        ],
        &[],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(admin.id, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Same doctor_id under a different territory collides.
    let body = multipart_body(
        &[
            ("territory", "T2"),
            ("doctor_id", "D1"),
            ("doctor_name", "Bob"),
        ],
        &[],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(admin.id, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error: serde_json::Value = body_json(response).await;
    assert_eq!(error["kind"], "conflict");
}

#[tokio::test]
async fn test_reupload_policy_reject_and_upsert() {
    let mut fixture = TestFixture::new();
    let territory = fixture.seed_territory("T1").await;
    let account = fixture
        .seed_account("T1", "territory", Some(territory.id))
        .await;

    let first = multipart_body(
        &[("doctor_id", "D1"), ("doctor_name", "Alice")],
        &[("self_image", "me.jpg", b"v1")],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(account.id, first))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Default policy rejects the duplicate outright.
    let again = multipart_body(
        &[("doctor_id", "D1"), ("doctor_name", "Alice")],
        &[("parents_image", "family.jpg", b"v1")],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(account.id, again))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Upsert policy fills in the missing image instead.
    fixture.config.reupload_policy = ReuploadPolicy::Upsert;
    let again = multipart_body(
        &[("doctor_id", "D1"), ("doctor_name", "Alice")],
        &[("parents_image", "family.jpg", b"v1")],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(account.id, again))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let upload: UploadResponse = body_json(response).await;
    assert!(upload.image_set.self_image.is_some());
    assert!(upload.image_set.parents_image.is_some());
}

#[tokio::test]
async fn test_require_all_images_flag() {
    let mut fixture = TestFixture::new();
    fixture.config.require_all_images = true;
    let territory = fixture.seed_territory("T1").await;
    let account = fixture
        .seed_account("T1", "territory", Some(territory.id))
        .await;

    let partial = multipart_body(
        &[("doctor_id", "D1"), ("doctor_name", "Alice")],
        &[("self_image", "me.jpg", b"v1")],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(account.id, partial))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let complete = multipart_body(
        &[("doctor_id", "D1"), ("doctor_name", "Alice")],
        &[
            ("self_image", "me.jpg", b"v1"),
            ("parents_image", "family.jpg", b"v1"),
            ("children_image", "kids.jpg", b"v1"),
        ],
    );
    let response = fixture
        .router()
        .oneshot(upload_request(account.id, complete))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fixture.storage.stored_paths().len(), 3);
}

// --- Directory / Search / Detail ---

#[tokio::test]
async fn test_directory_counts_distinct_doctors() {
    let fixture = TestFixture::new();
    let territory = fixture.seed_territory("T1").await;
    fixture.seed_territory("T2").await;
    let admin = fixture.seed_account("admin", "admin", None).await;

    for doctor in ["D1", "D2"] {
        fixture
            .repo
            .create_image_set(
                NewImageSet {
                    territory_id: territory.id,
                    doctor_id: doctor.to_string(),
                    doctor_name: "Doc".to_string(),
                    ..Default::default()
                },
                ReuploadPolicy::Reject,
            )
            .await
            .unwrap();
    }

    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/territories/")
                .header("x-user-id", admin.id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let page: DirectoryPage = body_json(response).await;
    assert_eq!(page.total, 2);
    let t1 = page.territories.iter().find(|t| t.code == "T1").unwrap();
    let t2 = page.territories.iter().find(|t| t.code == "T2").unwrap();
    assert_eq!(t1.doctor_count, 2);
    assert_eq!(t2.doctor_count, 0);
}

#[tokio::test]
async fn test_directory_clamps_out_of_range_pages() {
    let fixture = TestFixture::new();
    let admin = fixture.seed_account("admin", "admin", None).await;
    for i in 0..3 {
        fixture.seed_territory(&format!("T{i}")).await;
    }

    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/territories/?page=999")
                .header("x-user-id", admin.id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page: DirectoryPage = body_json(response).await;
    assert_eq!(page.page, page.page_count);
    assert!(!page.territories.is_empty());
}

#[tokio::test]
async fn test_search_redirects_on_match_and_reports_on_miss() {
    let fixture = TestFixture::new();
    fixture.seed_territory("T1").await;
    let admin = fixture.seed_account("admin", "admin", None).await;

    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/territories/?code=T1")
                .header("x-user-id", admin.id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/territory/T1/"
    );

    // A miss stays on the list with a message, never an error.
    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/territories/?code=ZZ")
                .header("x-user-id", admin.id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page: DirectoryPage = body_json(response).await;
    assert_eq!(page.message.as_deref(), Some("Territory 'ZZ' not found."));
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_territory_detail_and_unknown_code() {
    let fixture = TestFixture::new();
    let territory = fixture.seed_territory("T1").await;
    let admin = fixture.seed_account("admin", "admin", None).await;

    fixture
        .repo
        .create_image_set(
            NewImageSet {
                territory_id: territory.id,
                doctor_id: "D1".to_string(),
                doctor_name: "Alice".to_string(),
                self_image: Some("dr_images/T1/D1 - Alice/T1_D1_Alice_.jpg".to_string()),
                ..Default::default()
            },
            ReuploadPolicy::Reject,
        )
        .await
        .unwrap();

    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/territory/T1/")
                .header("x-user-id", admin.id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail: TerritoryDetail = body_json(response).await;
    assert_eq!(detail.territory.code, "T1");
    assert_eq!(detail.image_sets.len(), 1);
    assert_eq!(detail.image_sets[0].doctor_id, "D1");

    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/territory/NOPE/")
                .header("x-user-id", admin.id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_directory_requires_admin_role() {
    let fixture = TestFixture::new();
    let territory = fixture.seed_territory("T1").await;
    let account = fixture
        .seed_account("T1", "territory", Some(territory.id))
        .await;

    for uri in ["/territories/", "/territory/T1/", "/download/all"] {
        let response = fixture
            .router()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("x-user-id", account.id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "uri: {uri}");
    }
}

// --- Export ---

#[tokio::test]
async fn test_download_all_returns_zip() {
    let fixture = TestFixture::new();
    let admin = fixture.seed_account("admin", "admin", None).await;
    fixture
        .storage
        .save("dr_images/T1/D1 - Alice/T1_D1_Alice_parent.jpg", b"jpeg")
        .await
        .unwrap();

    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/download/all")
                .header("x-user-id", admin.id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(archive.len(), 1);
    assert_eq!(
        archive.by_index(0).unwrap().name(),
        "dr_images/T1/D1 - Alice/T1_D1_Alice_parent.jpg"
    );
}

#[tokio::test]
async fn test_download_all_with_empty_store_reports_not_found() {
    let fixture = TestFixture::new();
    let admin = fixture.seed_account("admin", "admin", None).await;

    let response = fixture
        .router()
        .oneshot(
            Request::builder()
                .uri("/download/all")
                .header("x-user-id", admin.id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: serde_json::Value = body_json(response).await;
    assert_eq!(error["kind"], "storage_unavailable");
}
