use crate::{
    AppState,
    auth::AuthUser,
    data_scope::{self, ScopeDecision},
    error::{ApiError, ApiResult},
    export, guard,
    models::{
        AvatarResponse, CreateUserRequest, Pageable, UpdateEmailRequest, UpdateUserRequest,
        User, UserDto, UserPage, UserPassRequest, UserQuery, UserQueryCriteria,
    },
    verification,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use uuid::Uuid;
use validator::Validate;

pub const PERM_LIST: &str = "user:list";
pub const PERM_ADD: &str = "user:add";
pub const PERM_EDIT: &str = "user:edit";
pub const PERM_DEL: &str = "user:del";

const AVATAR_EXTENSIONS: [&str; 4] = ["gif", "jpg", "jpeg", "png"];

/// Loads the caller's full row (with password hash) for the self-service endpoints.
async fn current_user(state: &AppState, auth: &AuthUser) -> ApiResult<User> {
    state
        .repo
        .find_user_by_name(&auth.username)
        .await?
        .ok_or(ApiError::Unauthorized)
}

/// get_users
///
/// Paged user listing restricted to the caller's department data scope.
/// A `deptId` filter is widened to the department's subtree, then intersected with what
/// the caller's roles allow. Disjoint sets short-circuit to an empty page.
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserQuery, Pageable),
    responses(
        (status = 200, description = "One page of users", body = UserPage),
        (status = 403, description = "Missing user:list")
    )
)]
pub async fn get_users(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
    Query(pageable): Query<Pageable>,
) -> ApiResult<Json<UserPage>> {
    auth.require(PERM_LIST)?;
    let repo = state.repo.as_ref();

    let mut criteria = UserQueryCriteria::from(query);
    let requested = data_scope::requested_dept_ids(repo, criteria.dept_id).await?;
    let authorized = data_scope::authorized_dept_ids(repo, auth.id, auth.dept_id).await?;

    match data_scope::resolve(requested, &authorized) {
        ScopeDecision::Deny => {
            tracing::debug!(user = %auth.username, "requested departments outside data scope");
            Ok(Json(UserPage::empty()))
        }
        ScopeDecision::Query(dept_ids) => {
            criteria.dept_ids = dept_ids;
            Ok(Json(repo.query_users(&criteria, &pageable).await?))
        }
    }
}

/// download_users
///
/// Exports every user matching the filters as a CSV attachment. No pagination, and no
/// data-scope narrowing: the export honours the filters as given.
#[utoipa::path(
    get,
    path = "/api/users/download",
    params(UserQuery),
    responses(
        (status = 200, description = "CSV export", content_type = "text/csv", body = String),
        (status = 403, description = "Missing user:list")
    )
)]
pub async fn download_users(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> ApiResult<impl IntoResponse> {
    auth.require(PERM_LIST)?;

    let users = state
        .repo
        .query_all_users(&UserQueryCriteria::from(query))
        .await?;
    tracing::info!(user = %auth.username, rows = users.len(), "exported users");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"users.csv\""),
        ],
        export::users_to_csv(&users),
    ))
}

/// create_user
///
/// Creates an account with the configured default password. The caller must be at least
/// as privileged as the strongest role being assigned.
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = UserDto),
        (status = 400, description = "Invalid payload or insufficient role privilege"),
        (status = 409, description = "Username or email taken")
    )
)]
pub async fn create_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserDto>)> {
    auth.require(PERM_ADD)?;
    payload.validate()?;

    let role_ids: Vec<i64> = payload.roles.iter().map(|r| r.id).collect();
    guard::check_assignable(state.repo.as_ref(), auth.id, &role_ids).await?;

    let password_hash = state.passwords.encode(&state.config.default_password)?;
    let user = state.repo.create_user(&payload, &password_hash).await?;

    tracing::info!(user = %auth.username, created = %user.username, "created user");
    Ok((StatusCode::CREATED, Json(user)))
}

/// update_user
///
/// Replaces an account's profile fields and role bindings. Same privilege rule as create.
#[utoipa::path(
    put,
    path = "/api/users",
    request_body = UpdateUserRequest,
    responses(
        (status = 204, description = "Updated"),
        (status = 400, description = "Invalid payload or insufficient role privilege"),
        (status = 404, description = "No such user")
    )
)]
pub async fn update_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<StatusCode> {
    auth.require(PERM_EDIT)?;
    payload.validate()?;

    let role_ids: Vec<i64> = payload.roles.iter().map(|r| r.id).collect();
    guard::check_assignable(state.repo.as_ref(), auth.id, &role_ids).await?;

    if !state.repo.update_user(&payload).await? {
        return Err(ApiError::NotFound);
    }

    tracing::info!(user = %auth.username, target = payload.id, "updated user");
    Ok(StatusCode::NO_CONTENT)
}

/// delete_user
///
/// Deletes an account, provided the caller is at least as privileged as the target.
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Deleted"),
        (status = 400, description = "Insufficient role privilege"),
        (status = 404, description = "No such user")
    )
)]
pub async fn delete_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    auth.require(PERM_DEL)?;
    guard::check_manageable(state.repo.as_ref(), auth.id, id).await?;

    if !state.repo.delete_user(id).await? {
        return Err(ApiError::NotFound);
    }

    tracing::info!(user = %auth.username, target = id, "deleted user");
    Ok(StatusCode::OK)
}

/// update_pass
///
/// Self-service password change. The old password must match and the new one must differ.
#[utoipa::path(
    post,
    path = "/api/users/updatePass",
    request_body = UserPassRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Old password wrong or new password unchanged")
    )
)]
pub async fn update_pass(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UserPassRequest>,
) -> ApiResult<StatusCode> {
    let user = current_user(&state, &auth).await?;

    if !state.passwords.matches(&payload.old_pass, &user.password) {
        return Err(ApiError::bad_request(
            "Update failed, old password is incorrect",
        ));
    }
    if state.passwords.matches(&payload.new_pass, &user.password) {
        return Err(ApiError::bad_request(
            "New password cannot be the same as the old password",
        ));
    }

    let password_hash = state.passwords.encode(&payload.new_pass)?;
    state
        .repo
        .update_password(&user.username, &password_hash)
        .await?;

    tracing::info!(user = %auth.username, "changed password");
    Ok(StatusCode::OK)
}

/// update_avatar
///
/// Self-service avatar upload (multipart field `file`). Only image extensions are accepted.
#[utoipa::path(
    post,
    path = "/api/users/updateAvatar",
    responses(
        (status = 200, description = "Avatar stored", body = AvatarResponse),
        (status = 400, description = "Missing, oversized or non-image file")
    )
)]
pub async fn update_avatar(
    auth: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<AvatarResponse>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        upload = Some((file_name, content_type, bytes));
        break;
    }

    let (file_name, content_type, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("Missing file"))?;

    let extension = avatar_extension(&file_name)
        .ok_or_else(|| ApiError::bad_request("Only gif, jpg, jpeg and png images are allowed"))?;
    if bytes.len() > state.config.avatar_max_bytes {
        return Err(ApiError::bad_request("File is too large"));
    }

    let avatar_name = format!("{}-{}.{}", auth.username, Uuid::new_v4(), extension);
    let url = state
        .storage
        .put_object(&format!("avatars/{}", avatar_name), bytes.to_vec(), &content_type)
        .await
        .map_err(|e| {
            tracing::error!("Storage Error: {}", e);
            ApiError::Storage(e)
        })?;

    state
        .repo
        .update_avatar(&auth.username, &avatar_name, &url)
        .await?;

    tracing::info!(user = %auth.username, "changed avatar");
    Ok(Json(AvatarResponse { avatar: url }))
}

/// Lower-cased extension of `file_name` when it is an accepted image type.
pub fn avatar_extension(file_name: &str) -> Option<String> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(std::ffi::OsStr::to_str)?
        .to_ascii_lowercase();
    AVATAR_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}

/// update_email
///
/// Self-service email change. Requires the current password and the code that was mailed
/// to the new address.
#[utoipa::path(
    post,
    path = "/api/users/updateEmail/{code}",
    params(("code" = String, Path, description = "Verification code mailed to the new address")),
    request_body = UpdateEmailRequest,
    responses(
        (status = 200, description = "Email changed"),
        (status = 400, description = "Wrong password or invalid code")
    )
)]
pub async fn update_email(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<UpdateEmailRequest>,
) -> ApiResult<StatusCode> {
    payload.validate()?;
    let user = current_user(&state, &auth).await?;

    if !state.passwords.matches(&payload.password, &user.password) {
        return Err(ApiError::bad_request("Incorrect password"));
    }

    verification::validate(
        state.repo.as_ref(),
        &code,
        verification::RESET_MAIL,
        verification::EMAIL_TYPE,
        &payload.email,
        state.config.code_expiration_minutes,
    )
    .await?;

    state
        .repo
        .update_email(&user.username, &payload.email)
        .await?;

    tracing::info!(user = %auth.username, "changed email");
    Ok(StatusCode::OK)
}
