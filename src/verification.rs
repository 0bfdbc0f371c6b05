use chrono::{Duration, Utc};

use crate::{
    error::{ApiError, ApiResult},
    repository::Repository,
};

/// Scene of the code mailed for an email-address change.
pub const RESET_MAIL: &str = "email:reset:";

pub const EMAIL_TYPE: &str = "email";

pub const INVALID_CODE: &str = "Invalid verification code";

/// validate
///
/// Redeems `code` for the (`scenes`, `code_type`, `value`) triple. The code must exist,
/// still be active, match exactly and be younger than `expiration_minutes`. A valid code
/// is consumed so it cannot be replayed.
pub async fn validate(
    repo: &dyn Repository,
    code: &str,
    scenes: &str,
    code_type: &str,
    value: &str,
    expiration_minutes: i64,
) -> ApiResult<()> {
    let stored = repo
        .find_active_code(scenes, code_type, value)
        .await?
        .ok_or_else(|| ApiError::bad_request(INVALID_CODE))?;

    if stored.code != code {
        return Err(ApiError::bad_request(INVALID_CODE));
    }
    if Utc::now() - stored.created_at > Duration::minutes(expiration_minutes) {
        tracing::debug!(code_id = stored.id, "verification code expired");
        return Err(ApiError::bad_request(INVALID_CODE));
    }

    if !repo.consume_code(stored.id).await? {
        tracing::debug!(code_id = stored.id, "verification code redeemed concurrently");
        return Err(ApiError::bad_request(INVALID_CODE));
    }
    Ok(())
}
