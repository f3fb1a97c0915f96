use std::collections::{BTreeSet, HashMap, HashSet};

use crate::authz::errors::AuthzError;
use crate::authz::types::RoleDef;

/// Derived role indexes, built once from the catalog and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    roles: HashMap<String, RoleDef>,
    /// permission -> roles that grant it (includes inheritance)
    permission_to_roles: HashMap<String, BTreeSet<String>>,
    /// role -> every permission it grants (includes inheritance)
    role_to_permissions: HashMap<String, BTreeSet<String>>,
    /// roles granted to every authenticated principal
    open_roles: BTreeSet<String>,
}

/// Roles that grant a permission, and the resource types they may be bound on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantingRoles {
    pub role_ids: BTreeSet<String>,
    pub resource_types: BTreeSet<String>,
}

impl GrantingRoles {
    pub fn is_empty(&self) -> bool {
        self.role_ids.is_empty()
    }
}

impl RoleGraph {
    /// Resolve `extends` and populate both indexes. Later definitions of the
    /// same role name replace earlier ones.
    pub fn build(defs: Vec<RoleDef>) -> Result<Self, AuthzError> {
        let mut roles: HashMap<String, RoleDef> = HashMap::new();
        for def in defs {
            roles.insert(def.name.clone(), def);
        }

        check_undefined_roles(&roles)?;
        check_role_cycles(&roles)?;

        let mut permission_to_roles: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut role_to_permissions = HashMap::with_capacity(roles.len());
        let mut open_roles = BTreeSet::new();

        for (name, role) in &roles {
            let mut perms = BTreeSet::new();
            collect_role_permissions(name, &roles, &mut HashSet::new(), &mut perms);
            for perm in &perms {
                permission_to_roles
                    .entry(perm.clone())
                    .or_default()
                    .insert(name.clone());
            }
            role_to_permissions.insert(name.clone(), perms);
            if role.granted_to_all_users {
                open_roles.insert(name.clone());
            }
        }

        Ok(Self {
            roles,
            permission_to_roles,
            role_to_permissions,
            open_roles,
        })
    }

    /// Roles granting `permission`. Empty for a permission no role grants.
    pub fn roles_that_grant_access(&self, permission: &str) -> GrantingRoles {
        let Some(role_ids) = self.permission_to_roles.get(permission) else {
            return GrantingRoles::default();
        };
        let resource_types = role_ids
            .iter()
            .filter_map(|r| self.roles.get(r))
            .flat_map(|r| r.resource_types.iter().cloned())
            .collect();
        GrantingRoles {
            role_ids: role_ids.clone(),
            resource_types,
        }
    }

    /// Every permission `role` grants, following `extends`.
    pub fn permissions_of(&self, role: &str) -> Option<&BTreeSet<String>> {
        self.role_to_permissions.get(role)
    }

    pub fn contains_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn is_open_role(&self, role: &str) -> bool {
        self.open_roles.contains(role)
    }

    pub fn open_roles(&self) -> &BTreeSet<String> {
        &self.open_roles
    }

    pub fn grants_permission(&self, permission: &str) -> bool {
        self.permission_to_roles.contains_key(permission)
    }

    pub fn role_names(&self) -> impl Iterator<Item = &String> {
        self.roles.keys()
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn permission_count(&self) -> usize {
        self.permission_to_roles.len()
    }
}

fn check_undefined_roles(roles: &HashMap<String, RoleDef>) -> Result<(), AuthzError> {
    let mut names: Vec<&String> = roles.keys().collect();
    names.sort();
    for name in names {
        for parent in &roles[name].extends {
            if !roles.contains_key(parent) {
                return Err(AuthzError::UndefinedRole(format!(
                    "{parent} (extended by {name})"
                )));
            }
        }
    }
    Ok(())
}

/// Check for cycles in role inheritance using DFS.
fn check_role_cycles(roles: &HashMap<String, RoleDef>) -> Result<(), AuthzError> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();

    // Sorted so the reported edge is stable across runs
    let mut names: Vec<&String> = roles.keys().collect();
    names.sort();
    for name in names {
        if !visited.contains(name.as_str()) {
            dfs_cycle_check(name, roles, &mut visited, &mut in_stack)?;
        }
    }
    Ok(())
}

fn dfs_cycle_check(
    name: &str,
    roles: &HashMap<String, RoleDef>,
    visited: &mut HashSet<String>,
    in_stack: &mut HashSet<String>,
) -> Result<(), AuthzError> {
    visited.insert(name.to_string());
    in_stack.insert(name.to_string());

    if let Some(role) = roles.get(name) {
        for parent in &role.extends {
            if in_stack.contains(parent.as_str()) {
                return Err(AuthzError::CyclicRoleInheritance(format!(
                    "{name} -> {parent}"
                )));
            }
            if !visited.contains(parent.as_str()) {
                dfs_cycle_check(parent, roles, visited, in_stack)?;
            }
        }
    }

    in_stack.remove(name);
    Ok(())
}

/// Union the permissions of `role_name` and everything it extends. Each role
/// is walked at most once, so diamonds and cycles terminate.
fn collect_role_permissions(
    role_name: &str,
    roles: &HashMap<String, RoleDef>,
    visited: &mut HashSet<String>,
    out: &mut BTreeSet<String>,
) {
    if !visited.insert(role_name.to_string()) {
        return;
    }

    let Some(role) = roles.get(role_name) else {
        return;
    };

    out.extend(role.permissions.iter().cloned());
    for parent in &role.extends {
        collect_role_permissions(parent, roles, visited, out);
    }
}
