use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AppConfig, Env},
    error::{ApiError, ApiResult},
    models::{DeptId, User},
    repository::RepositoryState,
};

/// Permission that satisfies every permission check.
pub const ADMIN_PERMISSION: &str = "admin";

/// Header accepted in `Env::Local` in place of a JWT.
pub const LOCAL_BYPASS_HEADER: &str = "x-username";

/// Claims
///
/// JWT payload. `sub` is the username the token was issued to.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// AuthUser
///
/// The resolved identity of the caller, loaded fresh from the database once per request
/// so a disabled account or revoked permission takes effect immediately.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub dept_id: Option<DeptId>,
    pub permissions: Vec<String>,
}

impl AuthUser {
    /// Passes when the caller holds `permission` or the `admin` permission.
    pub fn require(&self, permission: &str) -> ApiResult<()> {
        if self
            .permissions
            .iter()
            .any(|p| p == ADMIN_PERMISSION || p == permission)
        {
            return Ok(());
        }
        tracing::warn!(user = %self.username, permission, "permission denied");
        Err(ApiError::Forbidden)
    }
}

/// AuthUser Extractor Implementation
///
/// 1. In `Env::Local`, an `x-username` header naming an existing user is accepted as-is.
/// 2. Otherwise a `Bearer` JWT is required; its signature and expiry are checked.
/// 3. The user is loaded by name and must be enabled; its permissions are attached.
///
/// Any failure rejects with 401. A caller already resolved for this request (by the auth
/// middleware) is taken from the request extensions instead.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(resolved) = parts.extensions.get::<AuthUser>() {
            return Ok(resolved.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let username = match local_bypass(parts, &config) {
            Some(username) => username,
            None => {
                let token = parts
                    .headers
                    .get(header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .ok_or(ApiError::Unauthorized)?;
                decode_token(token, &config.jwt_secret)?.sub
            }
        };

        let user: User = repo
            .find_user_by_name(&username)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        if !user.enabled {
            tracing::info!(user = %user.username, "rejected disabled account");
            return Err(ApiError::Unauthorized);
        }

        let permissions = repo.find_permissions_by_user_id(user.id).await?;

        Ok(AuthUser {
            id: user.id,
            username: user.username,
            dept_id: user.dept_id,
            permissions,
        })
    }
}

fn local_bypass(parts: &Parts, config: &AppConfig) -> Option<String> {
    if config.env != Env::Local {
        return None;
    }
    parts
        .headers
        .get(LOCAL_BYPASS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Verifies signature and expiry of an HS256 token.
pub fn decode_token(token: &str, secret: &str) -> ApiResult<Claims> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("rejected token: {}", e);
            ApiError::Unauthorized
        })
}
