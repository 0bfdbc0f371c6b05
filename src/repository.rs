use crate::models::{
    CreateUserRequest, DataScope, Dept, DeptId, Pageable, RoleSmall, UpdateUserRequest, User,
    UserDto, UserPage, UserQueryCriteria, VerificationCode,
};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of a persistence call. Errors are passed through to the handlers untouched.
pub type RepoResult<T> = Result<T, sqlx::Error>;

/// Repository Trait
///
/// The persistence contract the handlers and the data-scope filter talk to.
/// `Send + Sync + async_trait` keep `Arc<dyn Repository>` usable across Axum tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn find_user_by_name(&self, username: &str) -> RepoResult<Option<User>>;
    async fn find_user_by_id(&self, id: i64) -> RepoResult<Option<UserDto>>;
    /// Paged listing. `criteria.dept_ids` restricts by department when non-empty.
    async fn query_users(&self, criteria: &UserQueryCriteria, pageable: &Pageable) -> RepoResult<UserPage>;
    /// Unpaged listing used by the export.
    async fn query_all_users(&self, criteria: &UserQueryCriteria) -> RepoResult<Vec<UserDto>>;
    async fn create_user(&self, req: &CreateUserRequest, password_hash: &str) -> RepoResult<UserDto>;
    /// Returns false when no user has `req.id`.
    async fn update_user(&self, req: &UpdateUserRequest) -> RepoResult<bool>;
    async fn delete_user(&self, id: i64) -> RepoResult<bool>;
    async fn update_password(&self, username: &str, password_hash: &str) -> RepoResult<()>;
    async fn update_avatar(&self, username: &str, avatar_name: &str, avatar_path: &str) -> RepoResult<()>;
    async fn update_email(&self, username: &str, email: &str) -> RepoResult<()>;

    // --- Roles & Permissions ---
    async fn find_roles_by_user_id(&self, user_id: i64) -> RepoResult<Vec<RoleSmall>>;
    /// The roles among `role_ids` that exist. Unknown ids are simply absent.
    async fn find_roles_by_ids(&self, role_ids: &[i64]) -> RepoResult<Vec<RoleSmall>>;
    async fn find_permissions_by_user_id(&self, user_id: i64) -> RepoResult<Vec<String>>;
    /// Departments bound to a `CUSTOMIZE` role.
    async fn find_depts_by_role_id(&self, role_id: i64) -> RepoResult<Vec<Dept>>;

    // --- Departments ---
    async fn find_dept_children(&self, pid: DeptId) -> RepoResult<Vec<Dept>>;

    // --- Verification codes ---
    /// The active (unused) code for a scene/type/value triple, newest first.
    async fn find_active_code(&self, scenes: &str, code_type: &str, value: &str) -> RepoResult<Option<VerificationCode>>;
    /// Marks the code used. False when it was already used, so only one caller wins.
    async fn consume_code(&self, id: i64) -> RepoResult<bool>;
}

/// LIKE pattern matching `raw` anywhere, with its own `%`, `_` and `\` taken literally.
pub fn contains_pattern(raw: &str) -> String {
    let mut pattern = String::with_capacity(raw.len() + 2);
    pattern.push('%');
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// RepositoryState
///
/// The shared handle to the persistence layer held in the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends the criteria's WHERE clauses. The builder must already end in `WHERE 1=1`.
    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, criteria: &UserQueryCriteria) {
        if let Some(id) = criteria.id {
            builder.push(" AND u.id = ").push_bind(id);
        }
        if let Some(enabled) = criteria.enabled {
            builder.push(" AND u.enabled = ").push_bind(enabled);
        }
        if let Some(blurry) = &criteria.blurry {
            let pattern = contains_pattern(blurry);
            builder.push(" AND (u.username ILIKE ").push_bind(pattern.clone());
            builder.push(r" ESCAPE '\' OR u.nick_name ILIKE ").push_bind(pattern.clone());
            builder.push(r" ESCAPE '\' OR u.email ILIKE ").push_bind(pattern);
            builder.push(r" ESCAPE '\')");
        }
        if let Some(from) = criteria.created_from {
            builder.push(" AND u.created_at >= ").push_bind(from);
        }
        if let Some(to) = criteria.created_to {
            builder.push(" AND u.created_at <= ").push_bind(to);
        }
        if !criteria.dept_ids.is_empty() {
            let ids: Vec<DeptId> = criteria.dept_ids.iter().copied().collect();
            builder.push(" AND u.dept_id = ANY(").push_bind(ids).push(")");
        }
    }

    /// Fills `roles` on each user with one query over `users_roles`.
    async fn attach_roles(&self, mut users: Vec<UserDto>) -> RepoResult<Vec<UserDto>> {
        if users.is_empty() {
            return Ok(users);
        }
        let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
        let rows: Vec<(i64, i64, String, i32, String)> = sqlx::query_as(
            r#"
            SELECT ur.user_id, r.id, r.name, r.level, r.data_scope
            FROM users_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = ANY($1)
            ORDER BY r.level ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_user: HashMap<i64, Vec<RoleSmall>> = HashMap::new();
        for (user_id, id, name, level, data_scope) in rows {
            let data_scope =
                DataScope::try_from(data_scope).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            by_user.entry(user_id).or_default().push(RoleSmall {
                id,
                name,
                level,
                data_scope,
            });
        }
        for user in &mut users {
            user.roles = by_user.remove(&user.id).unwrap_or_default();
        }
        Ok(users)
    }

    async fn replace_roles(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        user_id: i64,
        role_ids: &[i64],
    ) -> RepoResult<()> {
        sqlx::query("DELETE FROM users_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO users_roles (user_id, role_id) SELECT $1, UNNEST($2::BIGINT[])")
            .bind(user_id)
            .bind(role_ids)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

const USER_DTO_COLUMNS: &str = "u.id, u.username, u.nick_name, u.email, u.phone, u.gender, \
     u.avatar_name, u.avatar_path, u.enabled, u.dept_id, u.created_at, u.updated_at";

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_user_by_name(&self, username: &str) -> RepoResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, nick_name, email, phone, gender, avatar_name, avatar_path,
                   password, enabled, dept_id, created_at, updated_at, pwd_reset_time
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_user_by_id(&self, id: i64) -> RepoResult<Option<UserDto>> {
        let user = sqlx::query_as::<_, UserDto>(&format!(
            "SELECT {USER_DTO_COLUMNS} FROM users u WHERE u.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match user {
            Some(user) => Ok(self.attach_roles(vec![user]).await?.pop()),
            None => Ok(None),
        }
    }

    /// query_users
    ///
    /// Filtered, sorted and paged listing built with QueryBuilder so every user-supplied
    /// value is a bind parameter. The sort column comes from a whitelist.
    async fn query_users(&self, criteria: &UserQueryCriteria, pageable: &Pageable) -> RepoResult<UserPage> {
        let mut count: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM users u WHERE 1=1");
        Self::push_filters(&mut count, criteria);
        let total_elements: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {USER_DTO_COLUMNS} FROM users u WHERE 1=1"));
        Self::push_filters(&mut builder, criteria);
        let (column, direction) = pageable.order_by();
        builder.push(format!(" ORDER BY u.{column} {direction}"));
        builder.push(" LIMIT ").push_bind(pageable.limit());
        builder.push(" OFFSET ").push_bind(pageable.offset());

        let users = builder
            .build_query_as::<UserDto>()
            .fetch_all(&self.pool)
            .await?;

        Ok(UserPage {
            content: self.attach_roles(users).await?,
            total_elements,
        })
    }

    async fn query_all_users(&self, criteria: &UserQueryCriteria) -> RepoResult<Vec<UserDto>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {USER_DTO_COLUMNS} FROM users u WHERE 1=1"));
        Self::push_filters(&mut builder, criteria);
        builder.push(" ORDER BY u.id DESC");

        let users = builder
            .build_query_as::<UserDto>()
            .fetch_all(&self.pool)
            .await?;
        self.attach_roles(users).await
    }

    /// create_user
    ///
    /// Inserts the user and its role bindings in one transaction.
    async fn create_user(&self, req: &CreateUserRequest, password_hash: &str) -> RepoResult<UserDto> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, UserDto>(
            r#"
            INSERT INTO users (username, nick_name, email, phone, gender, password, enabled, dept_id,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            RETURNING id, username, nick_name, email, phone, gender, avatar_name, avatar_path,
                      enabled, dept_id, created_at, updated_at
            "#,
        )
        .bind(&req.username)
        .bind(&req.nick_name)
        .bind(&req.email)
        .bind(&req.phone)
        .bind(&req.gender)
        .bind(password_hash)
        .bind(req.enabled)
        .bind(req.dept_id)
        .fetch_one(&mut *tx)
        .await?;

        let role_ids: Vec<i64> = req.roles.iter().map(|r| r.id).collect();
        Self::replace_roles(&mut tx, user.id, &role_ids).await?;
        tx.commit().await?;

        Ok(self.attach_roles(vec![user]).await?.pop().unwrap_or_default())
    }

    async fn update_user(&self, req: &UpdateUserRequest) -> RepoResult<bool> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
            UPDATE users
            SET username = $2, nick_name = $3, email = $4, phone = $5, gender = $6,
                enabled = $7, dept_id = $8, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(req.id)
        .bind(&req.username)
        .bind(&req.nick_name)
        .bind(&req.email)
        .bind(&req.phone)
        .bind(&req.gender)
        .bind(req.enabled)
        .bind(req.dept_id)
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let role_ids: Vec<i64> = req.roles.iter().map(|r| r.id).collect();
        Self::replace_roles(&mut tx, req.id, &role_ids).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_user(&self, id: i64) -> RepoResult<bool> {
        // users_roles rows go with the user (ON DELETE CASCADE).
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn update_password(&self, username: &str, password_hash: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE users SET password = $2, pwd_reset_time = NOW(), updated_at = NOW() WHERE username = $1",
        )
        .bind(username)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_avatar(&self, username: &str, avatar_name: &str, avatar_path: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE users SET avatar_name = $2, avatar_path = $3, updated_at = NOW() WHERE username = $1",
        )
        .bind(username)
        .bind(avatar_name)
        .bind(avatar_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_email(&self, username: &str, email: &str) -> RepoResult<()> {
        sqlx::query("UPDATE users SET email = $2, updated_at = NOW() WHERE username = $1")
            .bind(username)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_roles_by_user_id(&self, user_id: i64) -> RepoResult<Vec<RoleSmall>> {
        sqlx::query_as::<_, RoleSmall>(
            r#"
            SELECT r.id, r.name, r.level, r.data_scope
            FROM roles r
            JOIN users_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.level ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn find_roles_by_ids(&self, role_ids: &[i64]) -> RepoResult<Vec<RoleSmall>> {
        sqlx::query_as::<_, RoleSmall>(
            "SELECT id, name, level, data_scope FROM roles WHERE id = ANY($1) ORDER BY level ASC",
        )
        .bind(role_ids)
        .fetch_all(&self.pool)
        .await
    }

    async fn find_permissions_by_user_id(&self, user_id: i64) -> RepoResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT rp.permission
            FROM roles_permissions rp
            JOIN users_roles ur ON ur.role_id = rp.role_id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn find_depts_by_role_id(&self, role_id: i64) -> RepoResult<Vec<Dept>> {
        sqlx::query_as::<_, Dept>(
            r#"
            SELECT d.id, d.pid, d.name, d.enabled
            FROM depts d
            JOIN roles_depts rd ON rd.dept_id = d.id
            WHERE rd.role_id = $1
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn find_dept_children(&self, pid: DeptId) -> RepoResult<Vec<Dept>> {
        sqlx::query_as::<_, Dept>("SELECT id, pid, name, enabled FROM depts WHERE pid = $1")
            .bind(pid)
            .fetch_all(&self.pool)
            .await
    }

    async fn find_active_code(&self, scenes: &str, code_type: &str, value: &str) -> RepoResult<Option<VerificationCode>> {
        sqlx::query_as::<_, VerificationCode>(
            r#"
            SELECT id, code, scenes, type, value, status, created_at
            FROM verification_codes
            WHERE scenes = $1 AND type = $2 AND value = $3 AND status = true
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(scenes)
        .bind(code_type)
        .bind(value)
        .fetch_optional(&self.pool)
        .await
    }

    async fn consume_code(&self, id: i64) -> RepoResult<bool> {
        let res = sqlx::query(
            "UPDATE verification_codes SET status = false WHERE id = $1 AND status = true",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}
