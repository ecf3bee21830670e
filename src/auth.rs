use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{
    DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::{
    config::{AppConfig, Env},
    error::PortalError,
    repository::RepositoryState,
};

/// Session token lifetime in seconds (12 hours).
const TOKEN_TTL_SECS: usize = 12 * 60 * 60;

/// Claims
///
/// Payload of the signed session token issued at login. `jti` identifies the
/// session itself: logout records it in `revoked_sessions`, and the extractor
/// rejects tokens whose jti has been revoked.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the account's UUID.
    pub sub: Uuid,
    /// Session id, unique per login. The unit of revocation.
    pub jti: Uuid,
    /// Expiration time (seconds since epoch).
    pub exp: usize,
    /// Issued-at time.
    pub iat: usize,
}

/// Hashes a password with Argon2id, returning the PHC-format string stored in
/// `accounts.password_hash`.
pub fn hash_password(password: &str) -> Result<String, PortalError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PortalError::Internal(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verifies a candidate password against a stored PHC hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Issues a signed session token for an account. Returns the token together
/// with its jti so callers can correlate the session.
pub fn issue_token(account_id: Uuid, jwt_secret: &str) -> Result<(String, Uuid), PortalError> {
    let now = chrono::Utc::now().timestamp() as usize;
    let jti = Uuid::new_v4();
    let claims = Claims {
        sub: account_id,
        jti,
        exp: now + TOKEN_TTL_SECS,
        iat: now,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| PortalError::Internal(e.to_string()))?;

    Ok((token, jti))
}

/// AuthUser
///
/// The resolved identity of an authenticated request. Carries the account's
/// role (RBAC) and its explicit territory link; territory-role accounts may
/// only upload for the territory referenced here.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    /// 'admin' or 'territory'.
    pub role: String,
    /// The linked territory for territory-role accounts; None for admins.
    pub territory_id: Option<Uuid>,
    /// The session id (jti) of the presented token. Nil for the dev bypass.
    pub session: Uuid,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// AuthUser Extractor Implementation
///
/// Implements Axum's FromRequestParts trait, making AuthUser usable as a
/// function argument in any protected handler. The flow:
/// 1. Dependency resolution: Repository and AppConfig from the app state.
/// 2. Local bypass: the 'x-user-id' header resolves an account directly when
///    running in Env::Local (development and tests only).
/// 3. Token validation: Bearer extraction, signature/expiry check.
/// 4. Revocation check: a logged-out jti rejects the request.
/// 5. DB lookup: the account must still exist; role and territory link are
///    read fresh so stale tokens cannot outlive account changes.
///
/// Rejection: `PortalError::AuthFailure` (401) on any failure.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = PortalError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        // Local development bypass, guarded by the Env check.
        if config.env == Env::Local {
            if let Some(user_id_header) = parts.headers.get("x-user-id") {
                if let Ok(id_str) = user_id_header.to_str() {
                    if let Ok(account_id) = Uuid::parse_str(id_str) {
                        if let Some(account) = repo.get_account(account_id).await? {
                            return Ok(AuthUser {
                                id: account.id,
                                username: account.username,
                                role: account.role,
                                territory_id: account.territory_id,
                                session: Uuid::nil(),
                            });
                        }
                    }
                }
            }
        }

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(PortalError::AuthFailure)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(PortalError::AuthFailure)?;

        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => data,
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => return Err(PortalError::AuthFailure),
                _ => return Err(PortalError::AuthFailure),
            },
        };

        // Logout invalidation: a revoked jti must never authenticate again.
        if repo.is_session_revoked(token_data.claims.jti).await? {
            return Err(PortalError::AuthFailure);
        }

        let account = repo
            .get_account(token_data.claims.sub)
            .await?
            .ok_or(PortalError::AuthFailure)?;

        Ok(AuthUser {
            id: account.id,
            username: account.username,
            role: account.role,
            territory_id: account.territory_id,
            session: token_data.claims.jti,
        })
    }
}
