use crate::config::ReuploadPolicy;
use crate::error::PortalError;
use crate::models::{
    Account, DirectoryPage, ImageSet, NewAccount, NewImageSet, NewTerritory, Territory,
    TerritorySummary,
};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum number of distinct doctors a territory may hold image sets for.
pub const DOCTORS_PER_TERRITORY: usize = 2;

/// Repository Trait
///
/// Abstract contract for all persistence operations, shared across handlers
/// as `Arc<dyn Repository>` so the Postgres implementation can be swapped for
/// an in-memory one in tests.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Territory registry ---
    async fn create_territory(&self, req: NewTerritory) -> Result<Territory, PortalError>;
    async fn get_territory_by_code(&self, code: &str) -> Result<Option<Territory>, PortalError>;
    async fn get_territory(&self, id: Uuid) -> Result<Option<Territory>, PortalError>;
    async fn list_territories(&self) -> Result<Vec<Territory>, PortalError>;

    /// One page of the directory, each territory annotated with its distinct
    /// doctor count. Out-of-range pages clamp to the nearest valid page.
    async fn territory_directory(
        &self,
        page: i64,
        page_size: i64,
    ) -> Result<DirectoryPage, PortalError>;

    // --- Image-set store ---
    /// The create operation. Enforces, in order: territory existence,
    /// non-empty doctor fields, the two-doctor capacity policy, and global
    /// doctor_id uniqueness. Re-uploads for an existing doctor in the same
    /// territory follow `policy`.
    async fn create_image_set(
        &self,
        req: NewImageSet,
        policy: ReuploadPolicy,
    ) -> Result<ImageSet, PortalError>;

    async fn image_sets_for_territory(
        &self,
        territory_id: Uuid,
    ) -> Result<Vec<ImageSet>, PortalError>;

    /// Compensating cleanup when a file write fails after the row committed.
    async fn delete_image_set(&self, id: Uuid) -> Result<bool, PortalError>;

    // --- Accounts & sessions ---
    async fn create_account(&self, req: NewAccount) -> Result<Account, PortalError>;
    async fn get_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, PortalError>;
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, PortalError>;
    async fn revoke_session(&self, jti: Uuid) -> Result<(), PortalError>;
    async fn is_session_revoked(&self, jti: Uuid) -> Result<bool, PortalError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// Decides whether a new image set for `doctor_id` may enter a territory that
/// already holds `existing` distinct doctor ids. Adding images for a doctor
/// already present is always allowed; only a third *distinct* doctor is capped.
pub fn enforce_capacity(
    existing: &[String],
    doctor_id: &str,
    territory_code: &str,
) -> Result<(), PortalError> {
    if existing.len() >= DOCTORS_PER_TERRITORY && !existing.iter().any(|d| d == doctor_id) {
        return Err(PortalError::CapacityExceeded(territory_code.to_string()));
    }
    Ok(())
}

/// Clamps a requested directory page into the valid range instead of erroring.
/// Returns the resolved page and the total page count (at least 1).
pub fn clamp_page(requested: i64, total: i64, page_size: i64) -> (i64, i64) {
    let page_count = ((total + page_size - 1) / page_size).max(1);
    (requested.clamp(1, page_count), page_count)
}

/// PostgresRepository
///
/// Concrete `Repository` backed by PostgreSQL via sqlx.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_territory(&self, req: NewTerritory) -> Result<Territory, PortalError> {
        let territory = sqlx::query_as::<_, Territory>(
            r#"
            INSERT INTO territories (id, code, name, region, zone)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, code, name, region, zone
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.code)
        .bind(&req.name)
        .bind(&req.region)
        .bind(&req.zone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                PortalError::Conflict(req.code.clone())
            }
            _ => PortalError::from(e),
        })?;

        Ok(territory)
    }

    async fn get_territory_by_code(&self, code: &str) -> Result<Option<Territory>, PortalError> {
        let territory = sqlx::query_as::<_, Territory>(
            "SELECT id, code, name, region, zone FROM territories WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(territory)
    }

    async fn get_territory(&self, id: Uuid) -> Result<Option<Territory>, PortalError> {
        let territory = sqlx::query_as::<_, Territory>(
            "SELECT id, code, name, region, zone FROM territories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(territory)
    }

    async fn list_territories(&self) -> Result<Vec<Territory>, PortalError> {
        let territories = sqlx::query_as::<_, Territory>(
            "SELECT id, code, name, region, zone FROM territories ORDER BY code ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(territories)
    }

    /// territory_directory
    ///
    /// The doctor count is recomputed per request as COUNT(DISTINCT doctor_id),
    /// matching the capacity invariant exactly (never a raw row count).
    async fn territory_directory(
        &self,
        page: i64,
        page_size: i64,
    ) -> Result<DirectoryPage, PortalError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM territories")
            .fetch_one(&self.pool)
            .await?;

        let (page, page_count) = clamp_page(page, total, page_size);

        let territories = sqlx::query_as::<_, TerritorySummary>(
            r#"
            SELECT t.id, t.code, t.name, t.region, t.zone,
                   COUNT(DISTINCT i.doctor_id) AS doctor_count
            FROM territories t
            LEFT JOIN image_sets i ON i.territory_id = t.id
            GROUP BY t.id, t.code, t.name, t.region, t.zone
            ORDER BY t.code ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(DirectoryPage {
            territories,
            page,
            page_count,
            total,
            message: None,
        })
    }

    /// create_image_set
    ///
    /// The capacity policy is a check-then-act sequence, so it runs inside a
    /// transaction holding a row lock on the territory: concurrent creates for
    /// the same territory serialize instead of racing past the count.
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

        let mut tx = self.pool.begin().await?;

        let territory = sqlx::query_as::<_, Territory>(
            "SELECT id, code, name, region, zone FROM territories WHERE id = $1 FOR UPDATE",
        )
        .bind(req.territory_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PortalError::NotFound("territory".to_string()))?;

        let existing: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT doctor_id FROM image_sets WHERE territory_id = $1")
                .bind(req.territory_id)
                .fetch_all(&mut *tx)
                .await?;

        enforce_capacity(&existing, &req.doctor_id, &territory.code)?;

        let image_set = if existing.iter().any(|d| d == &req.doctor_id) {
            match policy {
                ReuploadPolicy::Reject => {
                    return Err(PortalError::Conflict(req.doctor_id));
                }
                // Update-in-place: only provided images replace stored ones,
                // and uploaded_at keeps its original value.
                ReuploadPolicy::Upsert => {
                    sqlx::query_as::<_, ImageSet>(
                        r#"
                        UPDATE image_sets
                        SET doctor_name = $2,
                            self_image = COALESCE($3, self_image),
                            parents_image = COALESCE($4, parents_image),
                            children_image = COALESCE($5, children_image)
                        WHERE doctor_id = $1 AND territory_id = $6
                        RETURNING id, territory_id, doctor_id, doctor_name,
                                  self_image, parents_image, children_image, uploaded_at
                        "#,
                    )
                    .bind(&req.doctor_id)
                    .bind(&req.doctor_name)
                    .bind(&req.self_image)
                    .bind(&req.parents_image)
                    .bind(&req.children_image)
                    .bind(req.territory_id)
                    .fetch_one(&mut *tx)
                    .await?
                }
            }
        } else {
            sqlx::query_as::<_, ImageSet>(
                r#"
                INSERT INTO image_sets
                    (id, territory_id, doctor_id, doctor_name,
                     self_image, parents_image, children_image, uploaded_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                RETURNING id, territory_id, doctor_id, doctor_name,
                          self_image, parents_image, children_image, uploaded_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(req.territory_id)
            .bind(&req.doctor_id)
            .bind(&req.doctor_name)
            .bind(&req.self_image)
            .bind(&req.parents_image)
            .bind(&req.children_image)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match &e {
                // doctor_id is globally unique; a collision here means the id
                // belongs to a different territory.
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    PortalError::Conflict(req.doctor_id.clone())
                }
                _ => PortalError::from(e),
            })?
        };

        tx.commit().await?;
        Ok(image_set)
    }

    async fn image_sets_for_territory(
        &self,
        territory_id: Uuid,
    ) -> Result<Vec<ImageSet>, PortalError> {
        let sets = sqlx::query_as::<_, ImageSet>(
            r#"
            SELECT id, territory_id, doctor_id, doctor_name,
                   self_image, parents_image, children_image, uploaded_at
            FROM image_sets
            WHERE territory_id = $1
            ORDER BY uploaded_at ASC
            "#,
        )
        .bind(territory_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sets)
    }

    async fn delete_image_set(&self, id: Uuid) -> Result<bool, PortalError> {
        let result = sqlx::query("DELETE FROM image_sets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_account(&self, req: NewAccount) -> Result<Account, PortalError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, username, password_hash, role, territory_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, username, password_hash, role, territory_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.username)
        .bind(&req.password_hash)
        .bind(&req.role)
        .bind(req.territory_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                PortalError::Conflict(req.username.clone())
            }
            _ => PortalError::from(e),
        })?;
        Ok(account)
    }

    async fn get_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, PortalError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, username, password_hash, role, territory_id FROM accounts WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, PortalError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, username, password_hash, role, territory_id FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn revoke_session(&self, jti: Uuid) -> Result<(), PortalError> {
        sqlx::query("INSERT INTO revoked_sessions (jti) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(jti)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn is_session_revoked(&self, jti: Uuid) -> Result<bool, PortalError> {
        let found: Option<Uuid> =
            sqlx::query_scalar("SELECT jti FROM revoked_sessions WHERE jti = $1")
                .bind(jti)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}
