//! Role-level privilege guard.
//!
//! Role levels rank authority: 1 is the strongest. An actor may only create, edit or delete
//! accounts whose roles are at its own level or weaker.

use std::collections::HashSet;

use crate::{
    error::{ApiError, ApiResult},
    models::RoleSmall,
    repository::Repository,
};

/// Level of a user holding no roles at all: weaker than any real role.
pub const NO_ROLE_LEVEL: i32 = i32::MAX;

pub const INSUFFICIENT_PRIVILEGE: &str = "Insufficient role privilege";

pub const UNKNOWN_ROLE: &str = "Unknown role";

/// Strongest (numerically lowest) level among `roles`.
pub fn min_level(roles: &[RoleSmall]) -> i32 {
    roles.iter().map(|r| r.level).min().unwrap_or(NO_ROLE_LEVEL)
}

/// Fails when the actor is weaker than the target. Equal levels pass.
pub fn check_level(actor_level: i32, target_level: i32) -> ApiResult<()> {
    if actor_level > target_level {
        return Err(ApiError::bad_request(INSUFFICIENT_PRIVILEGE));
    }
    Ok(())
}

pub async fn user_level(repo: &dyn Repository, user_id: i64) -> ApiResult<i32> {
    Ok(min_level(&repo.find_roles_by_user_id(user_id).await?))
}

/// Guard for create/update: the actor against the roles being assigned.
/// Every requested id must name an existing role.
pub async fn check_assignable(repo: &dyn Repository, actor_id: i64, role_ids: &[i64]) -> ApiResult<()> {
    let requested: HashSet<i64> = role_ids.iter().copied().collect();
    let roles = repo.find_roles_by_ids(role_ids).await?;
    if requested.is_empty() || roles.len() != requested.len() {
        return Err(ApiError::bad_request(UNKNOWN_ROLE));
    }

    let actor_level = user_level(repo, actor_id).await?;
    check_level(actor_level, min_level(&roles))
}

/// Guard for delete: the actor against the target user's current roles.
pub async fn check_manageable(repo: &dyn Repository, actor_id: i64, target_id: i64) -> ApiResult<()> {
    let actor_level = user_level(repo, actor_id).await?;
    let target_level = user_level(repo, target_id).await?;
    check_level(actor_level, target_level)
}
