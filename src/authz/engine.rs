use std::collections::BTreeSet;

use crate::authz::errors::AuthzError;
use crate::authz::membership::{MembershipCache, MembershipResolver};
use crate::authz::request::CallContext;
use crate::authz::types::{AuthorizationResult, DenialReason, Policy, PolicyBinding, Principal};
use crate::authz::AuthzState;

impl AuthorizationResult {
    fn super_admin(principal: &Principal) -> Self {
        Self {
            granted: true,
            matched_roles: BTreeSet::new(),
            granting_roles: BTreeSet::new(),
            principal: principal.clone(),
            denial: None,
        }
    }

    /// Turn a denial into the matching `AuthzError`, naming `resources` in it.
    pub fn into_grant(self, permission: &str, resources: &[String]) -> Result<Self, AuthzError> {
        match self.denial {
            None => Ok(self),
            Some(DenialReason::UnknownPermission) => Err(AuthzError::UnknownPermission {
                permission: permission.to_string(),
                resources: resources.to_vec(),
            }),
            Some(DenialReason::NoMatchingMembership) => Err(AuthzError::PermissionDenied {
                permission: permission.to_string(),
                roles: self.granting_roles.into_iter().collect(),
                resources: resources.to_vec(),
            }),
        }
    }
}

/// Evaluates resource policies against the role graph for one principal.
pub struct PolicyEngine<'a> {
    state: &'a AuthzState,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(state: &'a AuthzState) -> Self {
        Self { state }
    }

    /// Decide whether `principal` holds `permission` through any binding in
    /// `policies` (plus any policy embedded in the principal's credential).
    pub async fn authorize<'p>(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        permission: &str,
        policies: impl IntoIterator<Item = &'p Policy>,
        cache: &MembershipCache,
    ) -> Result<AuthorizationResult, AuthzError> {
        if principal.is_super_admin {
            tracing::debug!(permission, "super admin bypasses policy checks");
            return Ok(AuthorizationResult::super_admin(principal));
        }

        let granting = self.state.graph.roles_that_grant_access(permission);
        if granting.is_empty() {
            tracing::debug!(permission, "no role grants permission");
            return Ok(AuthorizationResult {
                granted: false,
                matched_roles: BTreeSet::new(),
                granting_roles: BTreeSet::new(),
                principal: principal.clone(),
                denial: Some(DenialReason::UnknownPermission),
            });
        }

        let bindings = collect_bindings(principal, policies);
        let resolver = MembershipResolver::new(&self.state.groups);
        let mut matched = BTreeSet::new();

        if !principal.is_anonymous() {
            matched.extend(
                granting
                    .role_ids
                    .iter()
                    .filter(|r| self.state.graph.is_open_role(r))
                    .cloned(),
            );
        }

        for binding in bindings {
            if !self.state.graph.contains_role(&binding.role) {
                tracing::warn!(role = %binding.role, "ignoring binding for undefined role");
                continue;
            }
            if !granting.role_ids.contains(&binding.role) || matched.contains(&binding.role) {
                continue;
            }
            for member in &binding.members {
                if resolver.is_member(ctx, principal, member, cache).await? {
                    matched.insert(binding.role.clone());
                    break;
                }
            }
        }

        let granted = !matched.is_empty();
        tracing::debug!(
            permission,
            granted,
            matched_roles = matched.len(),
            "authorization decided"
        );
        Ok(AuthorizationResult {
            granted,
            matched_roles: matched,
            granting_roles: granting.role_ids,
            principal: principal.clone(),
            denial: (!granted).then_some(DenialReason::NoMatchingMembership),
        })
    }

    /// Every catalog role `principal` holds through `policies`, open roles included.
    /// A super admin holds every role.
    pub async fn roles_of<'p>(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        policies: impl IntoIterator<Item = &'p Policy>,
        cache: &MembershipCache,
    ) -> Result<BTreeSet<String>, AuthzError> {
        let graph = &self.state.graph;
        if principal.is_super_admin {
            return Ok(graph.role_names().cloned().collect());
        }

        let bindings = collect_bindings(principal, policies);
        let resolver = MembershipResolver::new(&self.state.groups);
        let mut roles = BTreeSet::new();
        if !principal.is_anonymous() {
            roles.extend(graph.open_roles().iter().cloned());
        }

        for binding in bindings {
            if roles.contains(&binding.role) {
                continue;
            }
            if !graph.contains_role(&binding.role) {
                tracing::warn!(role = %binding.role, "ignoring binding for undefined role");
                continue;
            }
            for member in &binding.members {
                if resolver.is_member(ctx, principal, member, cache).await? {
                    roles.insert(binding.role.clone());
                    break;
                }
            }
        }
        Ok(roles)
    }

    /// Every permission granted by the roles `principal` holds.
    pub async fn permissions_of<'p>(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        policies: impl IntoIterator<Item = &'p Policy>,
        cache: &MembershipCache,
    ) -> Result<BTreeSet<String>, AuthzError> {
        let roles = self.roles_of(ctx, principal, policies, cache).await?;
        Ok(self.permissions_for_roles(&roles))
    }

    pub fn permissions_for_roles(&self, roles: &BTreeSet<String>) -> BTreeSet<String> {
        roles
            .iter()
            .filter_map(|r| self.state.graph.permissions_of(r))
            .flatten()
            .cloned()
            .collect()
    }
}

/// Bindings of the supplied policies followed by those of the credential's own policy.
fn collect_bindings<'a, 'p>(
    principal: &'a Principal,
    policies: impl IntoIterator<Item = &'p Policy>,
) -> Vec<&'a PolicyBinding>
where
    'p: 'a,
{
    let mut bindings = Vec::new();
    for policy in policies {
        bindings.extend(&policy.bindings);
    }
    if let Some(policy) = &principal.policy {
        bindings.extend(&policy.bindings);
    }
    bindings
}
