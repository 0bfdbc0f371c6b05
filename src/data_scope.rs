//! Department data scope.
//!
//! A caller only sees users in the departments its roles grant. The list endpoint combines
//! that authorized set with the department the query asked for; an empty set on either side
//! means "no restriction from this side".

use std::collections::{HashSet, VecDeque};

use crate::{
    models::{DataScope, Dept, DeptId},
    repository::{RepoResult, Repository},
};

/// Outcome of combining a requested department set with an authorized one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeDecision {
    /// Run the query restricted to these departments. Empty means unrestricted.
    Query(HashSet<DeptId>),
    /// The two sets do not overlap: the caller sees nothing and persistence is not consulted.
    Deny,
}

/// resolve
///
/// Combines the departments a query asks for with the departments the caller may see.
///
/// | authorized | requested | result |
/// |---|---|---|
/// | non-empty | non-empty | intersection, `Deny` if it is empty |
/// | non-empty | empty | authorized |
/// | empty | any | requested (empty means unrestricted) |
pub fn resolve(requested: HashSet<DeptId>, authorized: &HashSet<DeptId>) -> ScopeDecision {
    if authorized.is_empty() {
        return ScopeDecision::Query(requested);
    }
    if requested.is_empty() {
        return ScopeDecision::Query(authorized.clone());
    }

    let overlap: HashSet<DeptId> = requested.intersection(authorized).copied().collect();
    if overlap.is_empty() {
        ScopeDecision::Deny
    } else {
        ScopeDecision::Query(overlap)
    }
}

/// Ids of every enabled department below `roots`, walking the tree breadth first.
/// The roots themselves are not included. A department is expanded at most once,
/// so a cycle in `pid` links cannot loop forever.
pub async fn descendants(repo: &dyn Repository, roots: &[DeptId]) -> RepoResult<HashSet<DeptId>> {
    let mut found = HashSet::new();
    let mut expanded: HashSet<DeptId> = HashSet::new();
    let mut queue: VecDeque<DeptId> = roots.iter().copied().collect();

    while let Some(pid) = queue.pop_front() {
        if !expanded.insert(pid) {
            continue;
        }
        for child in repo.find_dept_children(pid).await? {
            if child.enabled && found.insert(child.id) {
                queue.push_back(child.id);
            }
        }
    }

    Ok(found)
}

/// The department set a query for `dept_id` asks for: the department itself plus its
/// enabled descendants. `None` asks for nothing in particular.
pub async fn requested_dept_ids(
    repo: &dyn Repository,
    dept_id: Option<DeptId>,
) -> RepoResult<HashSet<DeptId>> {
    let Some(dept_id) = dept_id else {
        return Ok(HashSet::new());
    };
    let mut ids = descendants(repo, &[dept_id]).await?;
    ids.insert(dept_id);
    Ok(ids)
}

/// authorized_dept_ids
///
/// The departments a user may see, derived from its roles:
/// - any `ALL` role makes the scope unrestricted (empty set);
/// - `LEVEL` adds the user's own department;
/// - `CUSTOMIZE` adds the role's enabled departments and their enabled descendants.
pub async fn authorized_dept_ids(
    repo: &dyn Repository,
    user_id: i64,
    own_dept: Option<DeptId>,
) -> RepoResult<HashSet<DeptId>> {
    let roles = repo.find_roles_by_user_id(user_id).await?;
    if roles.iter().any(|r| r.data_scope == DataScope::All) {
        return Ok(HashSet::new());
    }

    let mut ids = HashSet::new();
    for role in &roles {
        match role.data_scope {
            DataScope::All => {}
            DataScope::Level => ids.extend(own_dept),
            DataScope::Customize => {
                let roots: Vec<DeptId> = repo
                    .find_depts_by_role_id(role.id)
                    .await?
                    .into_iter()
                    .filter(|d: &Dept| d.enabled)
                    .map(|d| d.id)
                    .collect();
                ids.extend(roots.iter().copied());
                ids.extend(descendants(repo, &roots).await?);
            }
        }
    }
    Ok(ids)
}
