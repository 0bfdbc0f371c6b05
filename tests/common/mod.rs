#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use user_admin::{
    ApiError, AppConfig, AppState,
    auth::AuthUser,
    models::{
        CreateUserRequest, DataScope, Dept, DeptId, Pageable, RoleSmall, UpdateUserRequest, User,
        UserDto, UserPage, UserQueryCriteria, VerificationCode,
    },
    password::PasswordEncoder,
    repository::{RepoResult, Repository},
    storage::MockStorageService,
};

// --- MOCK REPOSITORY IMPLEMENTATION ---

/// Everything the handlers asked persistence to do, in call order.
#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub query_users: Vec<UserQueryCriteria>,
    pub query_all_users: Vec<UserQueryCriteria>,
    pub created: Vec<(String, String)>,
    pub updated: Vec<i64>,
    pub deleted: Vec<i64>,
    pub password_updates: Vec<(String, String)>,
    pub avatar_updates: Vec<(String, String, String)>,
    pub email_updates: Vec<(String, String)>,
    pub consumed_codes: Vec<i64>,
    pub user_lookups: usize,
    pub permission_lookups: usize,
}

/// In-memory repository. Built with the `with_*` methods, then wrapped in an `Arc`.
#[derive(Default)]
pub struct MockRepo {
    pub users: Mutex<Vec<User>>,
    pub roles: HashMap<i64, RoleSmall>,
    pub user_roles: HashMap<i64, Vec<i64>>,
    pub permissions: HashMap<i64, Vec<String>>,
    pub role_depts: HashMap<i64, Vec<DeptId>>,
    pub depts: Vec<Dept>,
    pub codes: Mutex<Vec<VerificationCode>>,
    /// Canned result of `query_users`.
    pub page: UserPage,
    /// Lookups also return used codes, as a reader racing another redeemer would see them.
    pub stale_code_reads: bool,
    pub calls: Mutex<Calls>,
}

impl MockRepo {
    pub fn with_user(self, user: User) -> Self {
        self.users.lock().unwrap().push(user);
        self
    }

    pub fn with_role(mut self, id: i64, name: &str, level: i32, data_scope: DataScope) -> Self {
        self.roles.insert(
            id,
            RoleSmall {
                id,
                name: name.to_string(),
                level,
                data_scope,
            },
        );
        self
    }

    pub fn assign(mut self, user_id: i64, role_id: i64) -> Self {
        self.user_roles.entry(user_id).or_default().push(role_id);
        self
    }

    pub fn grant(mut self, user_id: i64, permissions: &[&str]) -> Self {
        self.permissions
            .entry(user_id)
            .or_default()
            .extend(permissions.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_dept(mut self, id: DeptId, pid: Option<DeptId>, enabled: bool) -> Self {
        self.depts.push(Dept {
            id,
            pid,
            name: format!("dept-{id}"),
            enabled,
        });
        self
    }

    pub fn bind_dept(mut self, role_id: i64, dept_id: DeptId) -> Self {
        self.role_depts.entry(role_id).or_default().push(dept_id);
        self
    }

    pub fn with_code(self, code: VerificationCode) -> Self {
        self.codes.lock().unwrap().push(code);
        self
    }

    pub fn with_stale_code_reads(mut self) -> Self {
        self.stale_code_reads = true;
        self
    }

    pub fn with_page(mut self, page: UserPage) -> Self {
        self.page = page;
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    pub fn stored_user(&self, username: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.username == username)
            .cloned()
    }

    fn roles_of(&self, user_id: i64) -> Vec<RoleSmall> {
        self.user_roles
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.roles.get(id).cloned())
            .collect()
    }

    fn dto(&self, user: &User) -> UserDto {
        UserDto {
            roles: self.roles_of(user.id),
            ..UserDto::from(user.clone())
        }
    }
}

#[async_trait]
impl Repository for MockRepo {
    async fn find_user_by_name(&self, username: &str) -> RepoResult<Option<User>> {
        self.calls.lock().unwrap().user_lookups += 1;
        Ok(self.stored_user(username))
    }

    async fn find_user_by_id(&self, id: i64) -> RepoResult<Option<UserDto>> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).map(|u| self.dto(u)))
    }

    async fn query_users(&self, criteria: &UserQueryCriteria, _pageable: &Pageable) -> RepoResult<UserPage> {
        self.calls.lock().unwrap().query_users.push(criteria.clone());
        Ok(self.page.clone())
    }

    async fn query_all_users(&self, criteria: &UserQueryCriteria) -> RepoResult<Vec<UserDto>> {
        self.calls
            .lock()
            .unwrap()
            .query_all_users
            .push(criteria.clone());
        let users = self.users.lock().unwrap();
        Ok(users.iter().map(|u| self.dto(u)).collect())
    }

    async fn create_user(&self, req: &CreateUserRequest, password_hash: &str) -> RepoResult<UserDto> {
        let mut users = self.users.lock().unwrap();
        let id = users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
        let user = User {
            id,
            username: req.username.clone(),
            nick_name: req.nick_name.clone(),
            email: req.email.clone(),
            phone: req.phone.clone(),
            gender: req.gender.clone(),
            password: password_hash.to_string(),
            enabled: req.enabled,
            dept_id: req.dept_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            ..User::default()
        };
        users.push(user.clone());
        self.calls
            .lock()
            .unwrap()
            .created
            .push((req.username.clone(), password_hash.to_string()));
        Ok(UserDto::from(user))
    }

    async fn update_user(&self, req: &UpdateUserRequest) -> RepoResult<bool> {
        let exists = self.users.lock().unwrap().iter().any(|u| u.id == req.id);
        if exists {
            self.calls.lock().unwrap().updated.push(req.id);
        }
        Ok(exists)
    }

    async fn delete_user(&self, id: i64) -> RepoResult<bool> {
        let mut users = self.users.lock().unwrap();
        let before = users.len();
        users.retain(|u| u.id != id);
        let deleted = users.len() < before;
        if deleted {
            self.calls.lock().unwrap().deleted.push(id);
        }
        Ok(deleted)
    }

    async fn update_password(&self, username: &str, password_hash: &str) -> RepoResult<()> {
        if let Some(user) = self
            .users
            .lock()
            .unwrap()
            .iter_mut()
            .find(|u| u.username == username)
        {
            user.password = password_hash.to_string();
        }
        self.calls
            .lock()
            .unwrap()
            .password_updates
            .push((username.to_string(), password_hash.to_string()));
        Ok(())
    }

    async fn update_avatar(&self, username: &str, avatar_name: &str, avatar_path: &str) -> RepoResult<()> {
        self.calls.lock().unwrap().avatar_updates.push((
            username.to_string(),
            avatar_name.to_string(),
            avatar_path.to_string(),
        ));
        Ok(())
    }

    async fn update_email(&self, username: &str, email: &str) -> RepoResult<()> {
        self.calls
            .lock()
            .unwrap()
            .email_updates
            .push((username.to_string(), email.to_string()));
        Ok(())
    }

    async fn find_roles_by_user_id(&self, user_id: i64) -> RepoResult<Vec<RoleSmall>> {
        Ok(self.roles_of(user_id))
    }

    async fn find_roles_by_ids(&self, role_ids: &[i64]) -> RepoResult<Vec<RoleSmall>> {
        let mut ids = role_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids
            .iter()
            .filter_map(|id| self.roles.get(id).cloned())
            .collect())
    }

    async fn find_permissions_by_user_id(&self, user_id: i64) -> RepoResult<Vec<String>> {
        self.calls.lock().unwrap().permission_lookups += 1;
        Ok(self.permissions.get(&user_id).cloned().unwrap_or_default())
    }

    async fn find_depts_by_role_id(&self, role_id: i64) -> RepoResult<Vec<Dept>> {
        let ids = self.role_depts.get(&role_id).cloned().unwrap_or_default();
        Ok(self
            .depts
            .iter()
            .filter(|d| ids.contains(&d.id))
            .cloned()
            .collect())
    }

    async fn find_dept_children(&self, pid: DeptId) -> RepoResult<Vec<Dept>> {
        Ok(self
            .depts
            .iter()
            .filter(|d| d.pid == Some(pid))
            .cloned()
            .collect())
    }

    async fn find_active_code(&self, scenes: &str, code_type: &str, value: &str) -> RepoResult<Option<VerificationCode>> {
        let codes = self.codes.lock().unwrap();
        Ok(codes
            .iter()
            .filter(|c| (c.status || self.stale_code_reads) && c.scenes == scenes && c.code_type == code_type && c.value == value)
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn consume_code(&self, id: i64) -> RepoResult<bool> {
        let consumed = match self
            .codes
            .lock()
            .unwrap()
            .iter_mut()
            .find(|c| c.id == id && c.status)
        {
            Some(code) => {
                code.status = false;
                true
            }
            None => false,
        };
        if consumed {
            self.calls.lock().unwrap().consumed_codes.push(id);
        }
        Ok(consumed)
    }
}

// --- PASSWORD ENCODER ---

/// Reversible stand-in for Argon2 so handler tests stay fast.
pub struct PlainEncoder;

impl PasswordEncoder for PlainEncoder {
    fn encode(&self, raw: &str) -> Result<String, ApiError> {
        Ok(format!("plain:{raw}"))
    }

    fn matches(&self, raw: &str, encoded: &str) -> bool {
        encoded == format!("plain:{raw}")
    }
}

// --- FIXTURES ---

pub const ADMIN_ID: i64 = 1;
pub const MANAGER_ID: i64 = 2;
pub const STAFF_ID: i64 = 3;

pub const ADMIN_ROLE: i64 = 1;
pub const MANAGER_ROLE: i64 = 2;
pub const STAFF_ROLE: i64 = 3;

pub fn user(id: i64, username: &str, raw_password: &str, dept_id: Option<DeptId>) -> User {
    User {
        id,
        username: username.to_string(),
        nick_name: username.to_string(),
        email: format!("{username}@example.com"),
        password: format!("plain:{raw_password}"),
        enabled: true,
        dept_id,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        ..User::default()
    }
}

/// Department tree used across the tests:
///
/// ```text
/// 1
/// ├── 2
/// │   └── 4
/// └── 3
///     └── 5 (disabled)
///         └── 6
/// ```
///
/// Roles: admin (level 1, ALL), manager (level 2, CUSTOMIZE on dept 2),
/// staff (level 5, LEVEL).
pub fn fixture() -> MockRepo {
    MockRepo::default()
        .with_dept(1, None, true)
        .with_dept(2, Some(1), true)
        .with_dept(3, Some(1), true)
        .with_dept(4, Some(2), true)
        .with_dept(5, Some(3), false)
        .with_dept(6, Some(5), true)
        .with_role(ADMIN_ROLE, "admin", 1, DataScope::All)
        .with_role(MANAGER_ROLE, "manager", 2, DataScope::Customize)
        .with_role(STAFF_ROLE, "staff", 5, DataScope::Level)
        .bind_dept(MANAGER_ROLE, 2)
        .with_user(user(ADMIN_ID, "admin", "admin-pass", Some(1)))
        .with_user(user(MANAGER_ID, "manager", "manager-pass", Some(2)))
        .with_user(user(STAFF_ID, "staff", "old", Some(4)))
        .assign(ADMIN_ID, ADMIN_ROLE)
        .assign(MANAGER_ID, MANAGER_ROLE)
        .assign(STAFF_ID, STAFF_ROLE)
        .grant(ADMIN_ID, &["admin"])
        .grant(MANAGER_ID, &["user:list", "user:add", "user:edit", "user:del"])
        .grant(STAFF_ID, &["user:list"])
}

pub fn auth_user(repo: &MockRepo, id: i64) -> AuthUser {
    let user = repo
        .users
        .lock()
        .unwrap()
        .iter()
        .find(|u| u.id == id)
        .cloned()
        .expect("fixture user");
    AuthUser {
        id: user.id,
        username: user.username,
        dept_id: user.dept_id,
        permissions: repo.permissions.get(&id).cloned().unwrap_or_default(),
    }
}

pub fn create_test_state(repo: Arc<MockRepo>, storage: MockStorageService) -> AppState {
    AppState {
        repo,
        storage: Arc::new(storage),
        passwords: Arc::new(PlainEncoder),
        config: AppConfig::default(),
    }
}
