use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashSet;
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Department identifier. Postgres BIGINT, never negative.
pub type DeptId = i64;

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// Full account row from the `users` table, including the password hash.
/// Only used server-side; anything sent to a client goes through `UserDto`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub nick_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub avatar_name: Option<String>,
    pub avatar_path: Option<String>,
    #[serde(skip_serializing)]
    pub password: String,
    pub enabled: bool,
    pub dept_id: Option<DeptId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pwd_reset_time: Option<DateTime<Utc>>,
}

/// UserDto
///
/// Client-facing view of a user: no password hash, roles attached.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserDto {
    pub id: i64,
    pub username: String,
    pub nick_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub avatar_name: Option<String>,
    pub avatar_path: Option<String>,
    pub enabled: bool,
    pub dept_id: Option<DeptId>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    // Loaded by a second query in the repository.
    #[sqlx(skip)]
    pub roles: Vec<RoleSmall>,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            nick_name: user.nick_name,
            email: user.email,
            phone: user.phone,
            gender: user.gender,
            avatar_name: user.avatar_name,
            avatar_path: user.avatar_path,
            enabled: user.enabled,
            dept_id: user.dept_id,
            created_at: user.created_at,
            updated_at: user.updated_at,
            roles: vec![],
        }
    }
}

/// DataScope
///
/// How much of the department tree a role can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum DataScope {
    /// Every department. Makes the caller's scope unrestricted.
    #[default]
    All,
    /// Only the user's own department.
    Level,
    /// The departments bound to the role, with their descendants.
    Customize,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown data scope `{0}`")]
pub struct UnknownDataScope(pub String);

impl TryFrom<String> for DataScope {
    type Error = UnknownDataScope;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "ALL" => Ok(DataScope::All),
            "LEVEL" => Ok(DataScope::Level),
            "CUSTOMIZE" => Ok(DataScope::Customize),
            _ => Err(UnknownDataScope(value)),
        }
    }
}

/// RoleSmall
///
/// The slice of a role needed for authorization: its privilege `level`
/// (lower is stronger) and its data scope.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RoleSmall {
    pub id: i64,
    pub name: String,
    pub level: i32,
    #[sqlx(try_from = "String")]
    pub data_scope: DataScope,
}

/// Dept
///
/// A node of the department forest. `pid` is `None` for roots.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Dept {
    pub id: DeptId,
    pub pid: Option<DeptId>,
    pub name: String,
    pub enabled: bool,
}

/// VerificationCode
///
/// An emailed code waiting to be redeemed. `status` turns false once used.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct VerificationCode {
    pub id: i64,
    pub code: String,
    pub scenes: String,
    #[sqlx(rename = "type")]
    pub code_type: String,
    pub value: String,
    pub status: bool,
    pub created_at: DateTime<Utc>,
}

// --- Query & Pagination ---

/// UserQuery
///
/// Query-string filters accepted by `GET /api/users` and `GET /api/users/download`.
#[derive(Debug, Clone, Deserialize, IntoParams, Default)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    pub id: Option<i64>,
    /// Free-text match over username, nick name and email.
    pub blurry: Option<String>,
    pub enabled: Option<bool>,
    /// Restrict to this department and its descendants.
    pub dept_id: Option<DeptId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

/// UserQueryCriteria
///
/// `UserQuery` plus the department set resolved by the data-scope filter.
/// An empty `dept_ids` means no department restriction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserQueryCriteria {
    pub id: Option<i64>,
    pub blurry: Option<String>,
    pub enabled: Option<bool>,
    pub dept_id: Option<DeptId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub dept_ids: HashSet<DeptId>,
}

impl From<UserQuery> for UserQueryCriteria {
    fn from(q: UserQuery) -> Self {
        Self {
            id: q.id,
            blurry: q.blurry.filter(|s| !s.trim().is_empty()),
            enabled: q.enabled,
            dept_id: q.dept_id,
            created_from: q.created_from,
            created_to: q.created_to,
            dept_ids: HashSet::new(),
        }
    }
}

const MAX_PAGE_SIZE: i64 = 1000;

/// Pageable
///
/// Zero-based page request. `sort` is `field,asc|desc`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct Pageable {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
    pub sort: Option<String>,
}

fn default_size() -> i64 {
    10
}

impl Default for Pageable {
    fn default() -> Self {
        Self {
            page: 0,
            size: default_size(),
            sort: None,
        }
    }
}

impl Pageable {
    pub fn limit(&self) -> i64 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        // `page` is client input; a huge value must not overflow.
        self.page.max(0).saturating_mul(self.limit())
    }

    /// Resolves `sort` against the sortable columns. Anything unknown falls back to
    /// `id DESC`, so the result is always safe to splice into SQL.
    pub fn order_by(&self) -> (&'static str, &'static str) {
        let Some(sort) = self.sort.as_deref() else {
            return ("id", "DESC");
        };
        let mut parts = sort.splitn(2, ',');
        let column = match parts.next().map(str::trim) {
            Some("id") => "id",
            Some("username") => "username",
            Some("nickName") | Some("nick_name") => "nick_name",
            Some("email") => "email",
            Some("createTime") | Some("createdAt") | Some("created_at") => "created_at",
            _ => return ("id", "DESC"),
        };
        let direction = match parts.next().map(|d| d.trim().to_ascii_lowercase()) {
            Some(d) if d == "asc" => "ASC",
            _ => "DESC",
        };
        (column, direction)
    }
}

/// UserPage
///
/// One page of users plus the total match count.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserPage {
    pub content: Vec<UserDto>,
    pub total_elements: i64,
}

impl UserPage {
    /// The page returned when the caller has no visibility at all.
    pub fn empty() -> Self {
        Self::default()
    }
}

// --- Request Payloads (Input Schemas) ---

/// RoleRef
///
/// A role referenced by id inside a create/update payload.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RoleRef {
    pub id: i64,
}

/// CreateUserRequest
///
/// Input payload for `POST /api/users`. The password is not accepted here;
/// new accounts get the configured default password.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateUserRequest {
    #[validate(length(min = 2, max = 20))]
    pub username: String,
    #[validate(length(min = 1, max = 64))]
    pub nick_name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    pub gender: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub dept_id: Option<DeptId>,
    #[validate(length(min = 1, message = "at least one role is required"))]
    pub roles: Vec<RoleRef>,
}

/// UpdateUserRequest
///
/// Input payload for `PUT /api/users`. Same fields as create, plus the target id.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateUserRequest {
    pub id: i64,
    #[validate(length(min = 2, max = 20))]
    pub username: String,
    #[validate(length(min = 1, max = 64))]
    pub nick_name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    pub gender: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub dept_id: Option<DeptId>,
    #[validate(length(min = 1, message = "at least one role is required"))]
    pub roles: Vec<RoleRef>,
}

fn default_enabled() -> bool {
    true
}

/// UserPassRequest
///
/// Input payload for `POST /api/users/updatePass`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserPassRequest {
    pub old_pass: String,
    pub new_pass: String,
}

/// UpdateEmailRequest
///
/// Input payload for `POST /api/users/updateEmail/{code}`: the current password
/// plus the new address the code was sent to.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateEmailRequest {
    pub password: String,
    #[validate(email)]
    pub email: String,
}

/// AvatarResponse
///
/// Output of `POST /api/users/updateAvatar`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AvatarResponse {
    pub avatar: String,
}
