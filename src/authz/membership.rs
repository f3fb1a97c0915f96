use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::authz::errors::{AuthzError, BoxError};
use crate::authz::request::CallContext;
use crate::authz::types::{MemberRef, Principal};

pub const USER_KIND: &str = "user";
pub const SERVICE_ACCOUNT_KIND: &str = "serviceAccount";
pub const DOMAIN_KIND: &str = "domain";

/// Group kinds resolved by the engine itself; callers may not register them.
pub const RESERVED_GROUP_KINDS: [&str; 3] = [USER_KIND, SERVICE_ACCOUNT_KIND, DOMAIN_KIND];

/// Decides membership of a principal in groups of one kind, e.g. `team:payments`.
///
/// Implementations may perform network I/O. Cancellation follows the caller:
/// dropping the authorization future drops the pending resolution.
#[async_trait]
pub trait GroupResolver: Send + Sync {
    async fn is_member(
        &self,
        ctx: &CallContext,
        kind: &str,
        id: &str,
        principal: &Principal,
    ) -> Result<bool, BoxError>;
}

/// Group kind -> resolver. Fixed once the `AuthzState` is shared.
#[derive(Clone, Default)]
pub struct GroupRegistry {
    resolvers: HashMap<String, Arc<dyn GroupResolver>>,
}

impl GroupRegistry {
    pub fn register(
        &mut self,
        kind: &str,
        resolver: Arc<dyn GroupResolver>,
    ) -> Result<(), AuthzError> {
        if RESERVED_GROUP_KINDS.contains(&kind) {
            return Err(AuthzError::ReservedGroupKind(kind.to_string()));
        }
        if kind.is_empty() || kind.contains(':') {
            return Err(AuthzError::InvalidCatalog(format!(
                "invalid group kind `{kind}`"
            )));
        }
        if self.resolvers.contains_key(kind) {
            return Err(AuthzError::DuplicateGroupResolver(kind.to_string()));
        }
        self.resolvers.insert(kind.to_string(), resolver);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn GroupResolver>> {
        self.resolvers.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &String> {
        self.resolvers.keys()
    }
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.resolvers.keys().collect();
        kinds.sort();
        f.debug_struct("GroupRegistry").field("kinds", &kinds).finish()
    }
}

/// Per-call memo of external group resolutions, keyed by member string.
///
/// Each member holds a once-cell, so concurrent evaluations within one call
/// share a single resolution. Failed resolutions leave the cell empty.
#[derive(Debug, Default)]
pub struct MembershipCache {
    entries: DashMap<String, Arc<OnceCell<bool>>>,
}

impl MembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, member: &str) -> Option<bool> {
        self.entries.get(member).and_then(|cell| cell.get().copied())
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, member: &str) -> Arc<OnceCell<bool>> {
        if let Some(cell) = self.entries.get(member) {
            return cell.clone();
        }
        self.entries.entry(member.to_string()).or_default().clone()
    }
}

pub struct MembershipResolver<'a> {
    groups: &'a GroupRegistry,
}

impl<'a> MembershipResolver<'a> {
    pub fn new(groups: &'a GroupRegistry) -> Self {
        Self { groups }
    }

    /// Whether `principal` is `member`, or belongs to the group it names.
    pub async fn is_member(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        member: &str,
        cache: &MembershipCache,
    ) -> Result<bool, AuthzError> {
        if principal.is_anonymous() {
            return Ok(false);
        }
        if member == principal.policy_member {
            return Ok(true);
        }
        let Some(group) = MemberRef::parse(member) else {
            return Ok(false);
        };
        match group.kind {
            USER_KIND | SERVICE_ACCOUNT_KIND => Ok(false),
            DOMAIN_KIND => Ok(in_domain(&principal.email, group.id)),
            kind => {
                let Some(resolver) = self.groups.get(kind) else {
                    return Ok(false);
                };
                let cell = cache.cell(member);
                let is_member = cell
                    .get_or_try_init(|| async {
                        tracing::debug!(kind, "resolving external group membership");
                        resolver
                            .is_member(ctx, kind, group.id, principal)
                            .await
                            .map_err(|source| AuthzError::GroupResolver {
                                member: member.to_string(),
                                source,
                            })
                    })
                    .await?;
                Ok(*is_member)
            }
        }
    }
}

fn in_domain(email: &str, domain: &str) -> bool {
    match email.rsplit_once('@') {
        Some((local, email_domain)) => {
            !local.is_empty() && email_domain.eq_ignore_ascii_case(domain)
        }
        None => false,
    }
}

/// Resolves groups declared in the catalog, e.g. `group "team:payments"`.
#[derive(Debug, Default)]
pub struct StaticGroupResolver {
    /// group id -> policy members
    groups: HashMap<String, HashSet<String>>,
}

impl StaticGroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_members<I>(&mut self, id: &str, members: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.groups.entry(id.to_string()).or_default().extend(members);
    }
}

#[async_trait]
impl GroupResolver for StaticGroupResolver {
    async fn is_member(
        &self,
        _ctx: &CallContext,
        _kind: &str,
        id: &str,
        principal: &Principal,
    ) -> Result<bool, BoxError> {
        Ok(self
            .groups
            .get(id)
            .is_some_and(|members| members.contains(&principal.policy_member)))
    }
}
